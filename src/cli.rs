// Command-line interface

use crate::config::Mode;
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

/// wshub - real-time expression hub over WebSocket
///
/// Clients connect to /ws, send expressions, and receive every evaluated
/// expression broadcast by the hub plus a replay of recent history.
#[derive(Debug, Parser)]
#[command(name = "wshub", author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file, in TOML format (not YAML)
    ///
    /// Keys: bind, http, maxmsg, channel_capacity, static_root, mode.
    #[arg(short, long, env = "WS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Home directory; logs are written to <home>/logs
    #[arg(long, env = "WS_HOME")]
    pub home: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, env = "WS_BIND")]
    pub bind: Option<IpAddr>,

    /// HTTP port
    #[arg(short, long, env = "WS_HTTP")]
    pub port: Option<u16>,

    /// Number of broadcasts replayed to newly connected clients
    #[arg(short = 'm', long, env = "WS_MAXMSG")]
    pub max_history: Option<usize>,

    /// Document served for non-WebSocket paths
    #[arg(long, env = "WS_STATIC_ROOT")]
    pub static_root: Option<PathBuf>,

    /// Deployment mode
    #[arg(long, env = "WS_MODE", value_enum)]
    pub mode: Option<Mode>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from([
            "wshub",
            "--port",
            "9001",
            "-m",
            "25",
            "--mode",
            "prod",
            "--bind",
            "127.0.0.1",
        ])
        .unwrap();

        assert_eq!(cli.port, Some(9001));
        assert_eq!(cli.max_history, Some(25));
        assert_eq!(cli.mode, Some(Mode::Prod));
        assert_eq!(cli.bind, Some("127.0.0.1".parse().unwrap()));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["wshub", "--port", "70000"]).is_err());
    }

    #[test]
    fn test_config_help_names_format() {
        use clap::CommandFactory;

        let command = Cli::command();
        let config = command
            .get_arguments()
            .find(|arg| arg.get_id() == "config")
            .unwrap();
        let help = config.get_help().unwrap().to_string();
        assert!(help.contains("TOML"));
        assert!(help.contains("not YAML"));
    }
}
