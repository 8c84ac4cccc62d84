//! Execution layer: a fixed pool of OS worker threads and the fixed set of
//! recognizer slots they run jobs against.

pub mod error;
pub mod recognizer_pool;
pub mod recycler;
pub mod worker_pool;

pub use error::PoolError;
pub use recognizer_pool::{Recognition, RecognizerPool};
pub use recycler::SlotRecycler;
pub use worker_pool::WorkerPool;
