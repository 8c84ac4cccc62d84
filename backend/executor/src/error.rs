use ocrforge_core::RecognizeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool is shutting down")]
    ShuttingDown,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("recognizer slot {slot} failed to initialise: {source}")]
    SlotInit {
        slot: usize,
        #[source]
        source: RecognizeError,
    },

    #[error("pool size must be at least 1")]
    Empty,
}
