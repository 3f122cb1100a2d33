use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "server_relay.log";

/// Installs the global subscriber: a console layer plus a JSON layer written
/// to a daily rolling file in `log_dir`.
///
/// `RUST_LOG` wins over `log_level` when set. The returned guard flushes the
/// file writer on drop, so `main` must hold it until exit.
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<WorkerGuard> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking_appender, guard) = non_blocking(file_appender);

    let console_layer = fmt::layer().with_target(true).with_ansi(true);

    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(non_blocking_appender)
        .json();

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .with_context(|| format!("Invalid log level {log_level:?}"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install the tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // Only one test may install the global subscriber per test binary.
    #[test]
    fn writes_json_lines_to_the_rolling_file() {
        let temp_dir = tempdir().expect("Failed to create temporary directory");
        let log_dir = temp_dir.path().join("nested").join("logs");

        let guard = setup_logging(&log_dir, "info").unwrap();
        tracing::info!(subscriber = 7, "This is an info message");
        tracing::debug!("This is filtered out");
        drop(guard);

        let log_files: Vec<_> = fs::read_dir(&log_dir)
            .expect("Failed to read log directory")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .collect();
        assert_eq!(log_files.len(), 1, "{log_files:?}");
        let name = log_files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(LOG_FILE_PREFIX), "{name}");

        let contents = fs::read_to_string(&log_files[0]).unwrap();
        let line = contents
            .lines()
            .find(|line| line.contains("This is an info message"))
            .expect("info message not found in log file");
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["fields"]["subscriber"], 7);
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(!contents.contains("This is filtered out"));
        }

        assert!(setup_logging(&log_dir, "info").is_err(), "second install must fail");
    }
}
