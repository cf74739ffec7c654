//! Tracing subscriber setup for the daemon.
//!
//! Console output always; when `[logging] log_dir` is set, a second layer
//! writes plain-text daily-rotated files (`ulticlock.log.YYYY-MM-DD`).
//! `RUST_LOG` overrides the configured level.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;
use crate::error::{AlarmError, Result};

/// Log file prefix inside the log directory.
pub const LOG_FILE_PREFIX: &str = "ulticlock.log";

/// Filter from `RUST_LOG`, else `level`, else plain `info`.
#[must_use]
pub fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must live as long
/// as `main`.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let registry = tracing_subscriber::registry()
        .with(build_filter(&config.level))
        .with(fmt::layer().with_target(true));

    let Some(dir) = &config.log_dir else {
        registry
            .try_init()
            .map_err(|e| AlarmError::Config(format!("tracing init failed: {e}")))?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .try_init()
        .map_err(|e| AlarmError::Config(format!("tracing init failed: {e}")))?;
    Ok(Some(guard))
}
