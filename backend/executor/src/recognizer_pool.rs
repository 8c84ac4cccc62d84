//! Fixed set of reusable recognizer slots.
//!
//! Slots are handed out round-robin through a lock-free cursor. Each slot is
//! paired with its own mutex, so the cursor only picks a *preferred* slot: a
//! task whose preferred slot is busy takes any free slot, and waits on the
//! preferred one only when every slot is busy. Two tasks never run against
//! the same recognizer at once, and recycling a slot waits for its live task.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ocrforge_core::{RecognizeError, Recognizer, RecognizerFactory};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::PoolError;
use crate::worker_pool::panic_message;

struct Slot {
    recognizer: Box<dyn Recognizer>,
    generation: u64,
}

/// Outcome of running one payload through a slot.
#[derive(Debug)]
pub struct Recognition {
    /// Slot that actually ran the payload (may differ from the preferred one)
    pub slot: usize,
    pub generation: u64,
    pub outcome: Result<String, RecognizeError>,
}

pub struct RecognizerPool {
    factory: Arc<dyn RecognizerFactory>,
    slots: Vec<Mutex<Slot>>,
    cursor: AtomicUsize,
}

impl RecognizerPool {
    /// Initialise `size` slots up front. Any slot failing to start fails the pool.
    pub fn new(factory: Arc<dyn RecognizerFactory>, size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::Empty);
        }

        let slots = (0..size)
            .map(|slot| {
                factory
                    .create()
                    .map(|recognizer| {
                        Mutex::new(Slot {
                            recognizer,
                            generation: 0,
                        })
                    })
                    .map_err(|source| PoolError::SlotInit { slot, source })
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(engine = factory.name(), slots = size, "Recognizer pool initialised");
        Ok(Self {
            factory,
            slots,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn engine(&self) -> &str {
        self.factory.name()
    }

    /// Next slot index by round-robin. O(1), never blocks.
    pub fn acquire_slot(&self) -> usize {
        self.cursor.fetch_add(1, Ordering::Relaxed) % self.slots.len()
    }

    /// Current generation of a slot (bumped on every recreation).
    pub fn generation(&self, slot: usize) -> u64 {
        self.slots[slot].lock().generation
    }

    /// Reset and run one payload on a checked-out slot.
    ///
    /// Engine errors and panics both come back as a failed outcome. A slot
    /// whose engine panicked is rebuilt before it is released.
    pub fn run(&self, preferred: usize, payload: &[u8]) -> Recognition {
        let (slot, mut guard) = self.checkout(preferred % self.slots.len());
        let generation = guard.generation;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            guard.recognizer.reset();
            guard.recognizer.recognize(payload)
        }));

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(slot, generation, panic = %message, "Recognizer panicked; rebuilding slot");
                self.replace(slot, &mut guard);
                Err(RecognizeError::Engine(format!("engine panicked: {message}")))
            }
        };

        Recognition {
            slot,
            generation,
            outcome,
        }
    }

    /// Recreate every slot in place, one at a time. Returns how many were replaced.
    pub fn recycle_all(&self) -> usize {
        let mut replaced = 0;
        for slot in 0..self.slots.len() {
            // Build outside the lock so the slot stays usable meanwhile.
            let fresh = match self.factory.create() {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(slot, error = %e, "Failed to recreate recognizer; keeping current instance");
                    continue;
                }
            };
            let old = {
                let mut guard = self.slots[slot].lock();
                guard.generation += 1;
                std::mem::replace(&mut guard.recognizer, fresh)
            };
            drop(old);
            replaced += 1;
        }
        debug!(replaced, total = self.slots.len(), "Recycled recognizer slots");
        replaced
    }

    fn checkout(&self, preferred: usize) -> (usize, MutexGuard<'_, Slot>) {
        let count = self.slots.len();
        for offset in 0..count {
            let index = (preferred + offset) % count;
            if let Some(guard) = self.slots[index].try_lock() {
                return (index, guard);
            }
        }
        (preferred, self.slots[preferred].lock())
    }

    fn replace(&self, slot: usize, guard: &mut MutexGuard<'_, Slot>) {
        match self.factory.create() {
            Ok(fresh) => {
                guard.recognizer = fresh;
                guard.generation += 1;
            }
            Err(e) => warn!(slot, error = %e, "Failed to rebuild recognizer after panic"),
        }
    }
}
