//! ocrforge gateway
//!
//! Streaming session protocol over TCP: per-connection session handling,
//! process-wide admission control, the accept loop, and a small client.

pub mod client;
pub mod error;
pub mod governor;
pub mod server;
pub mod session;
pub mod stats;

pub use client::{connect, JobSender, ResultStream};
pub use error::{AdmissionError, SessionError};
pub use governor::{AdmissionPermit, ResourceGovernor};
pub use server::OcrServer;
pub use session::{SessionHandler, SessionLimits, SessionSummary};
pub use stats::{ServerStats, StatsSnapshot};
