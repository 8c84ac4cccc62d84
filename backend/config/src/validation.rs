//! Config validation: errors abort startup, warnings are logged.

use thiserror::Error;

use crate::schema::OcrConfig;

/// Highest Tesseract page segmentation mode.
const MAX_PAGE_SEG_MODE: u8 = 13;

/// A config validation finding with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &OcrConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_server(config, &mut report);
    validate_workers(config, &mut report);
    validate_limits(config, &mut report);
    validate_engine(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_server(config: &OcrConfig, report: &mut ValidationReport) {
    let server = &config.server;
    if let Err(e) = server.socket_addr() {
        report.error("server.address", format!("{e:#}"));
    }
    if server.port == 0 {
        report.warn("server.port", "Port 0 binds an ephemeral port chosen by the OS");
    } else if server.port < 1024 {
        report.warn(
            "server.port",
            format!("Port {} requires elevated privileges; consider using a port >= 1024", server.port),
        );
    }
    if server.max_message_size == 0 {
        report.error("server.maxMessageSize", "maxMessageSize must be > 0");
    } else if server.max_message_size > u32::MAX as usize {
        report.error(
            "server.maxMessageSize",
            format!("maxMessageSize cannot exceed {} bytes (4-byte frame length)", u32::MAX),
        );
    }
    if server.shutdown_grace_secs == 0 {
        report.warn(
            "server.shutdownGraceSecs",
            "A zero grace period aborts open sessions immediately on shutdown",
        );
    }
}

fn validate_workers(config: &OcrConfig, report: &mut ValidationReport) {
    if config.workers.threads == 0 {
        report.error("workers.threads", "threads must be >= 1");
    }
    if config.workers.recycle_interval_secs == 0 {
        report.error("workers.recycleIntervalSecs", "recycleIntervalSecs must be >= 1");
    }
}

fn validate_limits(config: &OcrConfig, report: &mut ValidationReport) {
    let limits = &config.limits;
    if limits.max_in_flight_bytes == 0 {
        report.error("limits.maxInFlightBytes", "maxInFlightBytes must be > 0");
    } else if (config.server.max_message_size as u64) > limits.max_in_flight_bytes {
        report.warn(
            "limits.maxInFlightBytes",
            "Smaller than server.maxMessageSize; the largest accepted images can never be admitted",
        );
    }
    if limits.max_in_flight_jobs == 0 {
        report.error("limits.maxInFlightJobs", "maxInFlightJobs must be >= 1");
    }
    match limits.session_max_in_flight {
        Some(0) => report.error("limits.sessionMaxInFlight", "sessionMaxInFlight must be >= 1"),
        Some(n) if n > u32::MAX as usize => {
            report.error("limits.sessionMaxInFlight", "sessionMaxInFlight is too large")
        }
        Some(n) if n > limits.max_in_flight_jobs => report.warn(
            "limits.sessionMaxInFlight",
            format!(
                "sessionMaxInFlight ({n}) exceeds maxInFlightJobs ({}); a single session can exhaust the job budget",
                limits.max_in_flight_jobs
            ),
        ),
        _ => {}
    }
}

fn validate_engine(config: &OcrConfig, report: &mut ValidationReport) {
    let engine = &config.engine;
    if engine.command.trim().is_empty() {
        report.error("engine.command", "Engine command cannot be empty");
    }
    if engine.language.trim().is_empty() {
        report.error("engine.language", "Engine language cannot be empty");
    }
    if engine.page_seg_mode > MAX_PAGE_SEG_MODE {
        report.error(
            "engine.pageSegMode",
            format!("Unknown page segmentation mode {}; use 0-{MAX_PAGE_SEG_MODE}", engine.page_seg_mode),
        );
    }
}

fn validate_logging(config: &OcrConfig, report: &mut ValidationReport) {
    let level = config.logging.level.trim();
    if level.is_empty() {
        report.error("logging.level", "Log level cannot be empty");
    } else if !level.contains('=')
        && !matches!(
            level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error" | "off"
        )
    {
        report.warn(
            "logging.level",
            format!("Unrecognised level '{level}'; expected trace, debug, info, warn, error or a filter directive"),
        );
    }
}
