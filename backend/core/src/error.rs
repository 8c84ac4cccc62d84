use std::io;

use thiserror::Error;

/// Top-level error type for the ocrforge server process.
#[derive(Debug, Error)]
pub enum OcrError {
    #[error("startup failed: {0}")]
    Startup(String),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure reported by a recognition engine.
#[derive(Debug, Error)]
pub enum RecognizeError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    #[error("engine failure: {0}")]
    Engine(String),

    #[error("engine io error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while reading or writing length-prefixed frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: usize, limit: usize },

    #[error("failed to encode frame: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode frame: {0}")]
    Decode(#[source] bincode::Error),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True when the peer broke the protocol rather than the transport failing.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, FrameError::TooLarge { .. } | FrameError::Decode(_))
    }
}
