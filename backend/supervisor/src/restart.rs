//! Restart policy: a bounded number of restarts with a fixed backoff.

use std::time::Duration;

use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Restarts allowed over the process lifetime; the first launch is free.
    pub max_restarts: u32,
    /// Fixed delay before every restart.
    pub backoff: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

impl RestartPolicy {
    pub fn new(max_restarts: u32, backoff: Duration) -> Self {
        Self {
            max_restarts,
            backoff,
        }
    }

    pub fn should_restart(&self, restarts_so_far: u32) -> bool {
        restarts_so_far < self.max_restarts
    }
}

/// What to do after a failed launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Restart bookkeeping for one supervised service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartState {
    pub attempts: u32,
    pub restarts: u32,
    pub last_error: Option<String>,
}

impl RestartState {
    pub fn record_launch(&mut self) {
        self.attempts += 1;
    }

    /// Record a failure and decide whether another launch is allowed.
    pub fn record_failure(&mut self, policy: &RestartPolicy, error: &str) -> RestartDecision {
        self.last_error = Some(error.to_string());

        if policy.should_restart(self.restarts) {
            self.restarts += 1;
            warn!(
                attempt = self.attempts,
                restart = self.restarts,
                max = policy.max_restarts,
                delay_secs = policy.backoff.as_secs_f64(),
                error,
                "Service failed, will restart"
            );
            RestartDecision::RetryAfter(policy.backoff)
        } else {
            error!(
                attempt = self.attempts,
                restarts = self.restarts,
                error,
                "Restart limit reached"
            );
            RestartDecision::GiveUp
        }
    }
}
