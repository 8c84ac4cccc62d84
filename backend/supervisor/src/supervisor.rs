//! The supervisor run loop.
//!
//! Launches a [`Service`], restarts it with a fixed backoff when a launch
//! fails, and stops for good once the shutdown token fires or the restart
//! budget is spent. Restarts are counted over the process lifetime, so a
//! service that keeps failing after running for a while still runs out.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::SupervisorError;
use crate::restart::{RestartDecision, RestartPolicy, RestartState};

/// One launch attempt of a supervised service.
///
/// `run` returns `Ok(())` after a clean stop (normally because `shutdown`
/// fired) and an error for anything the supervisor should restart.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()>;
}

/// Outcome of a supervised run that ended without exhausting restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub attempts: u32,
    pub restarts: u32,
}

pub struct Supervisor {
    policy: RestartPolicy,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(policy: RestartPolicy, shutdown: CancellationToken) -> Self {
        Self { policy, shutdown }
    }

    pub fn policy(&self) -> RestartPolicy {
        self.policy
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn run<S>(&self, service: &S) -> Result<RunReport, SupervisorError>
    where
        S: Service + ?Sized,
    {
        let mut state = RestartState::default();

        loop {
            if self.shutdown.is_cancelled() {
                info!(service = service.name(), "Shutdown requested; not launching");
                return Ok(report(&state));
            }

            state.record_launch();
            info!(service = service.name(), attempt = state.attempts, "Starting service");

            let error = match service.run(self.shutdown.clone()).await {
                Ok(()) => {
                    info!(service = service.name(), attempt = state.attempts, "Service stopped");
                    return Ok(report(&state));
                }
                Err(e) => format!("{e:#}"),
            };

            if self.shutdown.is_cancelled() {
                warn!(service = service.name(), error = %error, "Service failed while shutting down");
                return Ok(report(&state));
            }

            match state.record_failure(&self.policy, &error) {
                RestartDecision::GiveUp => {
                    return Err(SupervisorError::RestartLimitExceeded {
                        restarts: state.restarts,
                        last_error: error,
                    });
                }
                RestartDecision::RetryAfter(delay) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            info!(service = service.name(), "Shutdown requested during backoff");
                            return Ok(report(&state));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

fn report(state: &RestartState) -> RunReport {
    RunReport {
        attempts: state.attempts,
        restarts: state.restarts,
    }
}
