use stargate_core::{QueueError, StorageError};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StatsError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("aggregate write failed: {0}")]
    Storage(#[from] StorageError),
}
