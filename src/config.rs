//! Process configuration.
//!
//! Values are layered, lowest precedence first: built-in defaults, an
//! optional TOML file, then environment variables and command-line flags
//! (both resolved by [`Cli`]).

use crate::cli::Cli;
use crate::hub::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_MAX_HISTORY};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 9000;

/// Default static document served for non-WebSocket paths
pub const DEFAULT_STATIC_ROOT: &str = "public/index.html";

/// Deployment mode; production only logs errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Dev,
    Prod,
}

/// Resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Address the HTTP listener binds to
    pub bind: IpAddr,

    /// HTTP port (0 = OS-assigned)
    pub port: u16,

    /// Number of broadcasts kept for replay
    pub max_history: usize,

    /// Capacity of each hub event channel
    pub channel_capacity: usize,

    /// Document served for every non-WebSocket path
    pub static_root: PathBuf,

    /// Home directory; logs go to `<home>/logs`
    pub home: PathBuf,

    pub mode: Mode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_history: DEFAULT_MAX_HISTORY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            static_root: PathBuf::from(DEFAULT_STATIC_ROOT),
            home: PathBuf::from("."),
            mode: Mode::Dev,
        }
    }
}

/// Keys accepted in a configuration file; all optional
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FileConfig {
    pub bind: Option<IpAddr>,
    pub http: Option<u16>,
    pub maxmsg: Option<usize>,
    pub channel_capacity: Option<usize>,
    pub static_root: Option<PathBuf>,
    pub mode: Option<Mode>,
}

impl FileConfig {
    /// Load a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Configuration file not found: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Configuration file found with error: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

impl Config {
    /// Resolve the configuration for a command line
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut config = Config::default();

        if let Some(path) = &cli.config {
            config.apply_file(FileConfig::load(path)?);
        }

        config.apply_cli(cli);
        config.validate()?;

        Ok(config)
    }

    /// Overlay values present in a configuration file
    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(bind) = file.bind {
            self.bind = bind;
        }
        if let Some(port) = file.http {
            self.port = port;
        }
        if let Some(max_history) = file.maxmsg {
            self.max_history = max_history;
        }
        if let Some(capacity) = file.channel_capacity {
            self.channel_capacity = capacity;
        }
        if let Some(static_root) = file.static_root {
            self.static_root = static_root;
        }
        if let Some(mode) = file.mode {
            self.mode = mode;
        }
    }

    /// Overlay values given on the command line or through the environment
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(home) = &cli.home {
            self.home = home.clone();
        }
        if let Some(bind) = cli.bind {
            self.bind = bind;
        }
        if let Some(port) = cli.port {
            self.port = port;
        }
        if let Some(max_history) = cli.max_history {
            self.max_history = max_history;
        }
        if let Some(static_root) = &cli.static_root {
            self.static_root = static_root.clone();
        }
        if let Some(mode) = cli.mode {
            self.mode = mode;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than zero");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.home.join("logs")
    }
}
