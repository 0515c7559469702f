// Log sink setup: stdout plus a daily rolling file under <home>/logs

use crate::config::{Config, Mode};
use anyhow::Context;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// File name prefix of the rolling log
pub const LOG_FILE_PREFIX: &str = "wshub.log";

/// Filter used when RUST_LOG is not set
pub fn default_filter(mode: Mode) -> &'static str {
    match mode {
        Mode::Dev => "wshub=debug,info",
        Mode::Prod => "error",
    }
}

/// Daily files kept on disk, two days of logs
pub const MAX_LOG_FILES: usize = 2;

/// Build the rolling file appender under `log_dir`
pub fn file_appender(log_dir: &Path) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Cannot create log directory {}", log_dir.display()))?;

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
        .with_context(|| format!("Cannot open log file in {}", log_dir.display()))
}

/// Install the global subscriber
///
/// The returned guard flushes the file writer on drop and must be kept alive
/// for the life of the process. Without a usable log directory, logs only go
/// to stdout.
pub fn init(config: &Config) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(config.mode).into());

    match file_appender(&config.log_dir()) {
        Ok(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);

            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(writer)
                        .with_ansi(false),
                )
                .init();

            Some(guard)
        }
        Err(e) => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();

            tracing::warn!("Logging to stdout only: {:#}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_by_mode() {
        assert_eq!(default_filter(Mode::Dev), "wshub=debug,info");
        assert_eq!(default_filter(Mode::Prod), "error");
        assert!(EnvFilter::try_new(default_filter(Mode::Dev)).is_ok());
    }

    #[test]
    fn test_file_appender_creates_log_dir() {
        let home = tempfile::tempdir().unwrap();
        let log_dir = home.path().join("logs");

        assert!(file_appender(&log_dir).is_ok());
        assert!(log_dir.is_dir());
    }

    #[test]
    fn test_file_appender_fails_on_unusable_dir() {
        let home = tempfile::tempdir().unwrap();
        let blocker = home.path().join("logs");
        std::fs::write(&blocker, "not a directory").unwrap();

        assert!(file_appender(&blocker).is_err());
    }
}
