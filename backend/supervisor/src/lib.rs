//! ocrforge supervisor
//!
//! Owns the process run loop: launches the OCR service, restarts it with a
//! bounded fixed backoff when it fails, and turns operator signals into a
//! graceful shutdown.

pub mod error;
pub mod panic;
pub mod restart;
pub mod service;
pub mod signals;
pub mod supervisor;

pub use error::SupervisorError;
pub use panic::install_panic_hook;
pub use restart::{RestartDecision, RestartPolicy, RestartState};
pub use service::OcrService;
pub use signals::spawn_signal_listener;
pub use supervisor::{RunReport, Service, Supervisor};
