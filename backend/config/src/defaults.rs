//! Config defaults: constants, plus values derived from other settings.

use crate::schema::OcrConfig;

pub const DEFAULT_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 50051;
/// 100 MiB, matching the frame codec's default.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

pub const DEFAULT_THREADS: usize = 4;
pub const DEFAULT_RECYCLE_INTERVAL_SECS: u64 = 30;

/// 1 GiB of image payload in flight across all sessions.
pub const DEFAULT_MAX_IN_FLIGHT_BYTES: u64 = 1024 * 1024 * 1024;
pub const DEFAULT_MAX_IN_FLIGHT_JOBS: usize = 256;

pub const DEFAULT_MAX_RESTARTS: u32 = 3;
pub const DEFAULT_BACKOFF_SECS: u64 = 5;

pub const DEFAULT_ENGINE_COMMAND: &str = "tesseract";
pub const DEFAULT_ENGINE_LANGUAGE: &str = "eng";
/// Tesseract page segmentation mode 6: a single uniform block of text.
pub const DEFAULT_PAGE_SEG_MODE: u8 = 6;

pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Fill in values that default from other settings.
pub fn apply_all_defaults(config: OcrConfig) -> OcrConfig {
    apply_limit_defaults(config)
}

/// The per-session ceiling follows the worker count unless set explicitly.
fn apply_limit_defaults(mut config: OcrConfig) -> OcrConfig {
    if config.limits.session_max_in_flight.is_none() {
        config.limits.session_max_in_flight = Some(config.workers.threads);
    }
    config
}
