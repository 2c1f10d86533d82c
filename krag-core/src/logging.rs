//! Logging configuration with rotation support
//!
//! # Example
//!
//! ```no_run
//! use krag_core::logging::init_logging;
//!
//! init_logging("logs", "krag.log", "info").unwrap();
//! ```

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{Error, Result};

/// Initialize logging with daily file rotation
///
/// - `directory`: directory to store logs
/// - `filename_prefix`: prefix for log files (e.g. "krag.log")
/// - `level`: default log level (e.g. "info", "debug"); `RUST_LOG` overrides
pub fn init_logging(directory: &str, filename_prefix: &str, level: &str) -> Result<()> {
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(filename_prefix)
        .build(directory)
        .map_err(|e| Error::Internal(format!("failed to create log appender: {e}")))?;

    // Stdout: human readable. File: plain text without ANSI codes.
    let stdout_layer = fmt::layer().with_target(false).compact();
    let file_layer = fmt::layer().with_writer(file_appender).with_ansi(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Internal(format!("failed to init tracing: {e}")))?;

    Ok(())
}
