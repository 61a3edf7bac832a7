use crate::config::LoggingConfig;
use crate::error::Result;
use chrono::Local;
use std::fs;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Per-run log file name, e.g. `log_2024-05-01_13-45-09.log`.
pub fn run_log_file_name() -> String {
    format!("log_{}.log", Local::now().format("%Y-%m-%d_%H-%M-%S"))
}

/// Initializes logging with a fine-grained per-run file and a coarse console stream.
///
/// The returned guard flushes the file writer when dropped, so the caller must keep
/// it alive for the whole run.
pub fn init_logging(config: &LoggingConfig) -> Result<(WorkerGuard, PathBuf)> {
    fs::create_dir_all(&config.dir)?;

    let file_name = run_log_file_name();
    let log_path = config.dir.join(&file_name);
    let file_appender = tracing_appender::rolling::never(&config.dir, &file_name);
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .json()
        .with_writer(non_blocking_writer)
        .with_filter(EnvFilter::new(&config.file_level));

    // CADEMY_LOG wins over the configured console level
    let console_filter = EnvFilter::try_from_env("CADEMY_LOG")
        .unwrap_or_else(|_| EnvFilter::new(&config.console_level));
    let console_layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stdout)
        .with_filter(console_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .init();

    Ok((guard, log_path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_log_name_is_timestamped() {
        let name = run_log_file_name();
        assert!(name.starts_with("log_"));
        assert!(name.ends_with(".log"));
        // log_YYYY-MM-DD_HH-MM-SS.log
        assert_eq!(name.len(), "log_2024-01-01_00-00-00.log".len());
    }
}
