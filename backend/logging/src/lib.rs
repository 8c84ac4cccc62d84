//! Structured logging for ocrforge.
//!
//! Console output (plain or JSON) plus an optional daily-rotated NDJSON file.

pub mod logger;

pub use logger::init_logger;
