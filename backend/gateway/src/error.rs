use ocrforge_core::FrameError;
use thiserror::Error;

/// Why a job was refused at admission. The message is sent to the client
/// verbatim as the result's `error_message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("In-flight byte budget exceeded")]
    ByteBudget,

    #[error("In-flight job budget exceeded")]
    JobBudget,
}

/// Connection-level failures. Per-job failures never show up here.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("transport failure: {0}")]
    Transport(#[source] FrameError),

    #[error("protocol violation: {0}")]
    Protocol(#[source] FrameError),

    #[error("outbound write failed; session degraded")]
    Degraded,
}

impl From<FrameError> for SessionError {
    fn from(err: FrameError) -> Self {
        if err.is_protocol_violation() {
            SessionError::Protocol(err)
        } else {
            SessionError::Transport(err)
        }
    }
}
