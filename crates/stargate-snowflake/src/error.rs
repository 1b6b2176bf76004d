use jiff::Timestamp;
use thiserror::Error;

/// Errors returned by Snowflake initialization and ID generation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid node id {node_id}; expected 0..={max_node_id}")]
    InvalidNodeId { node_id: u16, max_node_id: u16 },
    #[error("epoch is ahead of current clock time: epoch={epoch}, now={now}")]
    EpochAhead { epoch: Timestamp, now: Timestamp },
    #[error("clock moved backwards by {drift_ms}ms: last={last}, now={now}")]
    ClockMovedBackwards {
        last: Timestamp,
        now: Timestamp,
        drift_ms: i64,
    },
    #[error("timestamp field exhausted")]
    OverTimeLimit,
    #[error("generator state lock is poisoned")]
    StatePoisoned,
}
