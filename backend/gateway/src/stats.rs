//! Process-wide server counters.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Atomic counter for thread-safe incrementing
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
pub struct ServerStats {
    pub started_at: DateTime<Utc>,
    pub sessions_opened: Counter,
    pub sessions_closed: Counter,
    pub jobs_admitted: Counter,
    pub jobs_rejected: Counter,
    pub jobs_succeeded: Counter,
    pub jobs_failed: Counter,
    /// Results produced after their session was torn down
    pub results_discarded: Counter,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self {
            started_at: Utc::now(),
            sessions_opened: Counter::default(),
            sessions_closed: Counter::default(),
            jobs_admitted: Counter::default(),
            jobs_rejected: Counter::default(),
            jobs_succeeded: Counter::default(),
            jobs_failed: Counter::default(),
            results_discarded: Counter::default(),
        }
    }
}

impl ServerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: (Utc::now() - self.started_at).num_seconds().max(0) as u64,
            sessions_opened: self.sessions_opened.get(),
            sessions_closed: self.sessions_closed.get(),
            jobs_admitted: self.jobs_admitted.get(),
            jobs_rejected: self.jobs_rejected.get(),
            jobs_succeeded: self.jobs_succeeded.get(),
            jobs_failed: self.jobs_failed.get(),
            results_discarded: self.results_discarded.get(),
        }
    }
}

/// Point-in-time copy of [`ServerStats`], suitable for logging as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub jobs_admitted: u64,
    pub jobs_rejected: u64,
    pub jobs_succeeded: u64,
    pub jobs_failed: u64,
    pub results_discarded: u64,
}
