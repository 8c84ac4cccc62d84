//! Fixed-size worker thread pool with a running drain barrier.
//!
//! ```text
//!   submit() ──▶ [ FIFO queue ] ──▶ ocr-worker-0 ┐
//!                                ──▶ ocr-worker-1 ├─▶ active_count ──▶ drained
//!                                ──▶ ocr-worker-N ┘
//! ```
//!
//! A task is counted as active from the moment it leaves the queue until its
//! body returns (or panics), under the same lock as the queue. `drain()` waits
//! for "queue empty and nothing active", so work submitted while a drain is in
//! progress is waited for as well.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::error::PoolError;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct State {
    queue: VecDeque<Task>,
    active: usize,
    shutdown: bool,
}

impl State {
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.active == 0
    }
}

struct Shared {
    state: Mutex<State>,
    work_available: Condvar,
    drained: Condvar,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` long-lived workers.
    pub fn new(threads: usize) -> Result<Self, PoolError> {
        if threads == 0 {
            return Err(PoolError::Empty);
        }

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                active: 0,
                shutdown: false,
            }),
            work_available: Condvar::new(),
            drained: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(threads),
        };

        for index in 0..threads {
            let shared = Arc::clone(&pool.shared);
            let handle = thread::Builder::new()
                .name(format!("ocr-worker-{index}"))
                .spawn(move || worker_loop(shared, index))
                .map_err(PoolError::Spawn)?;
            pool.workers.push(handle);
        }

        info!(threads, "Worker pool started");
        Ok(pool)
    }

    /// Queue a task for any idle worker. Never blocks on execution.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return Err(PoolError::ShuttingDown);
            }
            state.queue.push_back(Box::new(task));
        }
        self.shared.work_available.notify_one();
        Ok(())
    }

    /// Block until the queue is empty and no task is executing.
    pub fn drain(&self) {
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            self.shared.drained.wait(&mut state);
        }
    }

    /// Tasks queued but not yet picked up.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Tasks currently executing.
    pub fn active(&self) -> usize {
        self.shared.state.lock().active
    }

    pub fn threads(&self) -> usize {
        self.workers.len()
    }

    /// Refuse further submissions. Already queued tasks still run.
    pub fn close(&self) {
        self.shared.state.lock().shutdown = true;
        self.shared.work_available.notify_all();
    }

    /// Close the pool and join every worker once the queue has emptied.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.close();

        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // A worker dropping the last handle must not join itself.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    debug!(worker = index, "Worker started");
    loop {
        let task = {
            let mut state = shared.state.lock();
            loop {
                if let Some(task) = state.queue.pop_front() {
                    state.active += 1;
                    break task;
                }
                if state.shutdown {
                    debug!(worker = index, "Worker exiting");
                    return;
                }
                shared.work_available.wait(&mut state);
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            error!(
                worker = index,
                panic = %panic_message(payload.as_ref()),
                "Task panicked; worker continues"
            );
        }

        let idle = {
            let mut state = shared.state.lock();
            state.active -= 1;
            state.is_idle()
        };
        if idle {
            shared.drained.notify_all();
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    #[test]
    fn drain_waits_for_every_task() {
        let pool = WorkerPool::new(4).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..64 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                thread::sleep(Duration::from_millis((i % 5) as u64));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.drain();
        assert_eq!(done.load(Ordering::SeqCst), 64);
        assert_eq!(pool.pending(), 0);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn second_drain_returns_immediately() {
        let pool = WorkerPool::new(2).unwrap();
        pool.submit(|| thread::sleep(Duration::from_millis(10))).unwrap();
        pool.drain();

        let started = Instant::now();
        pool.drain();
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn single_worker_dequeues_in_submission_order() {
        let pool = WorkerPool::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let order = Arc::clone(&order);
            pool.submit(move || order.lock().push(i)).unwrap();
        }
        pool.drain();

        assert_eq!(*order.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_task_does_not_wedge_drain() {
        let pool = WorkerPool::new(1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        pool.submit(|| panic!("engine blew up")).unwrap();
        let after = Arc::clone(&done);
        pool.submit(move || {
            after.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        pool.drain();
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(pool.active(), 0);
    }

    #[test]
    fn drain_also_covers_submissions_made_while_draining() {
        let pool = Arc::new(WorkerPool::new(2).unwrap());
        let done = Arc::new(AtomicUsize::new(0));
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let gate_done = Arc::clone(&done);
        pool.submit(move || {
            let _ = release_rx.recv();
            gate_done.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        let drainer = {
            let pool = Arc::clone(&pool);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                pool.drain();
                done.load(Ordering::SeqCst)
            })
        };

        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                thread::sleep(Duration::from_millis(2));
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        release_tx.send(()).unwrap();

        assert_eq!(drainer.join().unwrap(), 11);
    }

    #[test]
    fn closed_pool_rejects_new_work_but_finishes_queued_work() {
        let pool = WorkerPool::new(1).unwrap();
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.close();
        assert!(matches!(pool.submit(|| {}), Err(PoolError::ShuttingDown)));

        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn zero_threads_is_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(PoolError::Empty)));
    }
}
