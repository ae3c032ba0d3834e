//! Tracing setup: console output plus an optional daily log file.

use std::env;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::config::LoggingConfig;
use crate::error::{Result, SentinelError};

pub const DEBUG_ENV: &str = "SENTINEL_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "sentinel";

/// Installs the global subscriber. Keep the returned guard alive for as long
/// as file logging should flush.
///
/// A subscriber installed earlier (e.g. by a test harness) wins; this is not
/// an error.
pub fn init(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| is_truthy(&value))
        .unwrap_or(false);
    let console = console_directive(
        debug_enabled,
        env::var("RUST_LOG").ok(),
        &config.console_level,
    );

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter(&console));

    let (file_layer, guard) = match &config.directory {
        Some(directory) => {
            let (writer, guard) = create_log_writer(directory)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter(&config.file_level));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already installed");
    }

    Ok(guard)
}

/// Daily-rolling, non-blocking writer under `directory`.
pub fn create_log_writer(directory: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    fs_err::create_dir_all(directory).map_err(|source| SentinelError::Io {
        context: "create log directory".to_string(),
        source,
    })?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(directory)
        .map_err(|err| SentinelError::Logging(err.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Debug flag beats `RUST_LOG`, which beats the configured level.
fn console_directive(debug_enabled: bool, rust_log: Option<String>, configured: &str) -> String {
    if debug_enabled {
        return "debug".to_string();
    }
    match rust_log {
        Some(value) if !value.trim().is_empty() => value,
        _ => configured.to_string(),
    }
}

fn filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES")
}
