//! Process-wide admission control.
//!
//! Two budgets are enforced together: total payload bytes held by admitted
//! jobs, and the number of admitted jobs. Admission reserves both with a
//! compare-and-swap loop; the returned permit gives them back on drop, so a
//! job's budget is released exactly once however its task ends.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::error::AdmissionError;

#[derive(Debug)]
pub struct ResourceGovernor {
    max_bytes: u64,
    max_jobs: usize,
    in_flight_bytes: AtomicU64,
    in_flight_jobs: AtomicUsize,
}

impl ResourceGovernor {
    pub fn new(max_bytes: u64, max_jobs: usize) -> Self {
        Self {
            max_bytes,
            max_jobs,
            in_flight_bytes: AtomicU64::new(0),
            in_flight_jobs: AtomicUsize::new(0),
        }
    }

    /// Reserve `bytes` and one job slot, or say which budget is exhausted.
    pub fn try_admit(self: &Arc<Self>, bytes: u64) -> Result<AdmissionPermit, AdmissionError> {
        self.in_flight_bytes
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(bytes)
                    .filter(|total| *total <= self.max_bytes)
            })
            .map_err(|current| {
                debug!(current, bytes, limit = self.max_bytes, "Byte budget exhausted");
                AdmissionError::ByteBudget
            })?;

        let jobs = self
            .in_flight_jobs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_jobs).then_some(current + 1)
            });
        if jobs.is_err() {
            self.in_flight_bytes.fetch_sub(bytes, Ordering::AcqRel);
            debug!(limit = self.max_jobs, "Job budget exhausted");
            return Err(AdmissionError::JobBudget);
        }

        Ok(AdmissionPermit {
            governor: Arc::clone(self),
            bytes,
        })
    }

    pub fn in_flight_bytes(&self) -> u64 {
        self.in_flight_bytes.load(Ordering::Acquire)
    }

    pub fn in_flight_jobs(&self) -> usize {
        self.in_flight_jobs.load(Ordering::Acquire)
    }
}

/// One admitted job's share of the budgets.
#[derive(Debug)]
pub struct AdmissionPermit {
    governor: Arc<ResourceGovernor>,
    bytes: u64,
}

impl AdmissionPermit {
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.governor
            .in_flight_bytes
            .fetch_sub(self.bytes, Ordering::AcqRel);
        self.governor.in_flight_jobs.fetch_sub(1, Ordering::AcqRel);
    }
}
