//! Structured Logger
//!
//! Wraps `tracing` to provide console output, an optional rolling NDJSON
//! file, and environment-based level control (`RUST_LOG` beats config).

use std::path::Path;

use anyhow::{Context, Result};
use ocrforge_config::LoggingConfig;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const LOG_FILE_PREFIX: &str = "ocrforge";
const FALLBACK_LEVEL: &str = "info";

/// Initialize the global structured logger.
///
/// Calling it twice is harmless; the first subscriber stays installed.
pub fn init_logger(config: &LoggingConfig) -> Result<()> {
    let (env_filter, rejected) = build_filter(std::env::var("RUST_LOG").ok(), &config.level);

    let console_layer = if config.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_current_span(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_thread_names(true)
            .with_ansi(true)
            .boxed()
    };

    // Rolling file appender: writes NDJSON to `<dir>/ocrforge.YYYY-MM-DD.log`
    let file_layer = match &config.dir {
        Some(dir) => Some(
            fmt::layer()
                .json()
                .with_writer(file_appender(dir)?)
                .with_ansi(false),
        ),
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(env_filter)
        .try_init();

    if let Some(directive) = rejected {
        tracing::warn!(level = %directive, "Invalid log level; falling back to {}", FALLBACK_LEVEL);
    }
    Ok(())
}

/// Pick the filter: `RUST_LOG` when set, else the configured level.
///
/// Returns the rejected directive when the configured level does not parse.
fn build_filter(rust_log: Option<String>, level: &str) -> (EnvFilter, Option<String>) {
    if let Some(filter) = rust_log
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
    {
        return (filter, None);
    }
    match EnvFilter::try_new(level) {
        Ok(filter) => (filter, None),
        Err(_) => (EnvFilter::new(FALLBACK_LEVEL), Some(level.to_string())),
    }
}

fn file_appender(dir: &Path) -> Result<RollingFileAppender> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .with_context(|| format!("Failed to open log directory: {}", dir.display()))
}
