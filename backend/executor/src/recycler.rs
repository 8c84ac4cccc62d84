//! Background thread that periodically recreates every recognizer slot to
//! bound the engine's memory growth.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::PoolError;
use crate::recognizer_pool::RecognizerPool;

/// Handle to the recycler thread. Stops promptly on `shutdown()` or drop.
pub struct SlotRecycler {
    stop_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SlotRecycler {
    pub fn start(pool: Arc<RecognizerPool>, interval: Duration) -> Result<Self, PoolError> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread_handle = thread::Builder::new()
            .name("recognizer-recycler".to_string())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let replaced = pool.recycle_all();
                        debug!(replaced, "Recognizer slots recycled");
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        debug!("Slot recycler received shutdown signal");
                        break;
                    }
                }
            })
            .map_err(PoolError::Spawn)?;

        info!("Slot recycler started (interval: {}s)", interval.as_secs_f32());

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread_handle: Some(thread_handle),
        })
    }

    /// Stop the thread and wait for an in-progress recycle pass to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            debug!("Slot recycler stopped");
        }
    }
}

impl Drop for SlotRecycler {
    fn drop(&mut self) {
        self.stop();
    }
}
