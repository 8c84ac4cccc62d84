use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("service failed after {restarts} restarts: {last_error}")]
    RestartLimitExceeded { restarts: u32, last_error: String },
}
