use async_trait::async_trait;
use parking_lot::Mutex;
use crate::DEFAULT_STREAM_MAX_LEN;
use stargate_core::queue::{ClaimedBatch, QueueBroker, Result, StreamMessage, CLAIM_START};
use stargate_core::QueueError;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Debug, Default)]
struct Group {
    last_delivered: u64,
    pending: BTreeMap<u64, PendingEntry>,
}

#[derive(Debug, Default)]
struct Stream {
    last_seq: u64,
    entries: BTreeMap<u64, HashMap<String, String>>,
    groups: HashMap<String, Group>,
}

fn message_id(seq: u64) -> String {
    format!("0-{seq}")
}

fn parse_id(id: &str) -> Option<u64> {
    id.split_once('-').and_then(|(_, seq)| seq.parse().ok())
}

fn no_group(stream: &str, group: &str) -> QueueError {
    QueueError::Operation(format!("NOGROUP no consumer group '{group}' for stream '{stream}'"))
}

/// A process-local broker with consumer-group semantics.
///
/// Mirrors the Redis Stream behaviour the consumer relies on: each entry is
/// delivered once per group, stays pending until acknowledged, and can be
/// claimed by another consumer after sitting idle. Appends trim the
/// oldest entries beyond `max_len`, pending or not, as `XADD MAXLEN` does.
#[derive(Debug)]
pub struct InMemoryBroker {
    streams: Mutex<HashMap<String, Stream>>,
    appended: Notify,
    max_len: usize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::with_max_len(DEFAULT_STREAM_MAX_LEN)
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            appended: Notify::new(),
            max_len,
        }
    }

    /// Entries delivered to `group` but not yet acknowledged.
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len())
    }

    /// How many times the entry has been handed to a consumer.
    pub fn delivery_count(&self, stream: &str, group: &str, id: &str) -> u32 {
        let Some(seq) = parse_id(id) else {
            return 0;
        };
        self.streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .and_then(|g| g.pending.get(&seq))
            .map_or(0, |p| p.deliveries)
    }

    pub fn len(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .map_or(0, |s| s.entries.len())
    }

    pub fn is_empty(&self, stream: &str) -> bool {
        self.len(stream) == 0
    }

    fn deliver_new(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Result<Vec<StreamMessage>> {
        let mut streams = self.streams.lock();
        let state = streams.get_mut(stream).ok_or_else(|| no_group(stream, group))?;
        let Stream {
            entries, groups, ..
        } = state;
        let group_state = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;

        let now = Instant::now();
        let mut delivered = Vec::new();
        for (seq, fields) in entries.range(group_state.last_delivered + 1..).take(count) {
            group_state.last_delivered = *seq;
            group_state.pending.insert(
                *seq,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                    deliveries: 1,
                },
            );
            delivered.push(StreamMessage {
                id: message_id(*seq),
                fields: fields.clone(),
            });
        }
        Ok(delivered)
    }
}

#[async_trait]
impl QueueBroker for InMemoryBroker {
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String> {
        let id = {
            let mut streams = self.streams.lock();
            let state = streams.entry(stream.to_string()).or_default();
            state.last_seq += 1;
            let fields = fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect();
            state.entries.insert(state.last_seq, fields);
            while state.entries.len() > self.max_len {
                state.entries.pop_first();
            }
            message_id(state.last_seq)
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str, start_offset: &str) -> Result<bool> {
        let mut streams = self.streams.lock();
        let state = streams.entry(stream.to_string()).or_default();
        if state.groups.contains_key(group) {
            return Ok(false);
        }
        let last_delivered = match start_offset {
            "$" => state.last_seq,
            offset => parse_id(offset).unwrap_or(0),
        };
        state.groups.insert(
            group.to_string(),
            Group {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(true)
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            // Registered before checking so an append between the check and
            // the wait still wakes us.
            let appended = self.appended.notified();
            let delivered = self.deliver_new(stream, group, consumer, count)?;
            if !delivered.is_empty() {
                return Ok(delivered);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64> {
        let mut streams = self.streams.lock();
        let Some(group_state) = streams.get_mut(stream).and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(0);
        };
        let acked = ids
            .iter()
            .filter_map(|id| parse_id(id))
            .filter(|seq| group_state.pending.remove(seq).is_some())
            .count();
        Ok(acked as u64)
    }

    async fn claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        cursor: &str,
        count: usize,
    ) -> Result<ClaimedBatch> {
        let mut streams = self.streams.lock();
        let state = streams.get_mut(stream).ok_or_else(|| no_group(stream, group))?;
        let Stream {
            entries, groups, ..
        } = state;
        let group_state = groups.get_mut(group).ok_or_else(|| no_group(stream, group))?;

        let start = parse_id(cursor).unwrap_or(0);
        let now = Instant::now();
        let mut next_cursor = CLAIM_START.to_string();
        let mut messages = Vec::new();
        let mut trimmed = Vec::new();
        for (seq, pending) in group_state.pending.range_mut(start..) {
            if messages.len() >= count {
                next_cursor = message_id(*seq);
                break;
            }
            if now.duration_since(pending.delivered_at) < min_idle {
                continue;
            }
            let Some(fields) = entries.get(seq) else {
                trimmed.push(*seq);
                continue;
            };
            pending.consumer = consumer.to_string();
            pending.delivered_at = now;
            pending.deliveries += 1;
            messages.push(StreamMessage {
                id: message_id(*seq),
                fields: fields.clone(),
            });
        }
        for seq in trimmed {
            group_state.pending.remove(&seq);
        }
        Ok(ClaimedBatch {
            next_cursor,
            messages,
        })
    }
}
