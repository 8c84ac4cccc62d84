use serde::{Deserialize, Serialize};

use crate::types::{JobRequest, JobResult};

/// Frames sent from the client to the server.
///
/// Enums stay externally tagged: the wire codec is bincode, which cannot
/// decode internally tagged representations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Submit one image for recognition
    Submit(JobRequest),
    /// No more submissions will follow on this session
    Finish,
}

/// Frames sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// One completed (or rejected) job, in completion order
    Result(JobResult),
    /// Final frame: every result for every accepted request has been sent
    Close(CloseStatus),
}

/// How a session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseStatus {
    Ok,
    Error { message: String },
}

impl CloseStatus {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, CloseStatus::Ok)
    }
}
