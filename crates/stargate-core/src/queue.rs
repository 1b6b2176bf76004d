use crate::error::QueueError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// A message read from a stream, with its broker-assigned id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Cursor that starts a pending-entry scan at the oldest entry.
pub const CLAIM_START: &str = "0-0";

/// One page of a [`QueueBroker::claim_stale`] scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedBatch {
    /// Where the next scan resumes. [`CLAIM_START`] once the whole pending
    /// list has been walked.
    pub next_cursor: String,
    pub messages: Vec<StreamMessage>,
}

/// An append-only log with consumer-group semantics.
///
/// Each message is handed to one live consumer of a group at a time and
/// stays pending until acknowledged.
#[async_trait]
pub trait QueueBroker: Send + Sync + 'static {
    /// Appends a message and returns the id the broker assigned to it.
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String>;

    /// Creates `group` on `stream`, creating the stream when missing.
    ///
    /// Returns `false` when the group already existed.
    async fn create_group(&self, stream: &str, group: &str, start_offset: &str) -> Result<bool>;

    /// Reads up to `count` messages never delivered to this group, waiting
    /// at most `block` when none are available.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>>;

    /// Acknowledges messages so the group will not redeliver them.
    /// Returns how many were pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64>;

    /// Transfers to `consumer` up to `count` pending messages that have
    /// not been acknowledged for at least `min_idle`, scanning the pending
    /// list from `cursor` onward.
    ///
    /// Pending entries whose message was trimmed from the stream are
    /// dropped from the group instead of being returned.
    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        cursor: &str,
        count: usize,
    ) -> Result<ClaimedBatch>;
}
