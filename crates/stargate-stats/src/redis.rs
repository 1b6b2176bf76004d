use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use crate::DEFAULT_STREAM_MAX_LEN;
use redis::streams::{
    StreamAutoClaimReply, StreamId, StreamMaxlen, StreamReadOptions, StreamReadReply,
};
use redis::AsyncCommands;
use stargate_core::queue::{ClaimedBatch, QueueBroker, Result, StreamMessage};
use stargate_core::QueueError;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{trace, warn};

pub(crate) fn map_redis_error(operation: &str, err: redis::RedisError) -> QueueError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() {
        QueueError::Timeout(message)
    } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        QueueError::Unavailable(message)
    } else {
        QueueError::Operation(message)
    }
}

fn into_message(entry: StreamId) -> StreamMessage {
    let fields: HashMap<String, String> = entry
        .map
        .keys()
        .filter_map(|field| entry.get::<String>(field).map(|value| (field.clone(), value)))
        .collect();
    StreamMessage {
        id: entry.id,
        fields,
    }
}

/// A [`QueueBroker`] over Redis Streams and consumer groups.
///
/// `XREADGROUP ... BLOCK` holds its connection until data arrives or the
/// block expires, so blocking reads go through a separate `reader`
/// connection and never stall appends from the redirect path.
///
/// Every append caps its stream with `MAXLEN ~`, so acknowledged history
/// does not grow without bound.
#[derive(Clone)]
pub struct RedisStreamBroker {
    conn: MultiplexedConnection,
    reader: MultiplexedConnection,
    max_len: usize,
}

impl RedisStreamBroker {
    /// Uses one connection for everything. Suitable for producers that
    /// never call [`QueueBroker::read_group`].
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self {
            reader: conn.clone(),
            conn,
            max_len: DEFAULT_STREAM_MAX_LEN,
        }
    }

    /// The reader connection's response timeout must exceed the block
    /// duration passed to `read_group`.
    pub fn with_reader(conn: MultiplexedConnection, reader: MultiplexedConnection) -> Self {
        Self {
            conn,
            reader,
            max_len: DEFAULT_STREAM_MAX_LEN,
        }
    }

    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }
}

#[async_trait]
impl QueueBroker for RedisStreamBroker {
    async fn append(&self, stream: &str, fields: &[(&str, String)]) -> Result<String> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(stream, StreamMaxlen::Approx(self.max_len), "*", fields)
            .await
            .map_err(|e| map_redis_error("failed to append to stream", e))?;
        trace!(stream, %id, "xadd");
        Ok(id)
    }

    async fn create_group(&self, stream: &str, group: &str, start_offset: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        match conn
            .xgroup_create_mkstream::<_, _, _, ()>(stream, group, start_offset)
            .await
        {
            Ok(()) => Ok(true),
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(false),
            Err(err) => Err(map_redis_error("failed to create consumer group", err)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>> {
        let options = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block.as_millis().max(1) as usize);

        let mut reader = self.reader.clone();
        let reply: Option<StreamReadReply> = reader
            .xread_options(&[stream], &[">"], &options)
            .await
            .map_err(|e| {
                warn!(stream, group, error = %e, "xreadgroup failed");
                map_redis_error("failed to read from consumer group", e)
            })?;

        Ok(reply
            .into_iter()
            .flat_map(|reply| reply.keys)
            .flat_map(|key| key.ids)
            .map(into_message)
            .collect())
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        conn.xack(stream, group, ids)
            .await
            .map_err(|e| map_redis_error("failed to acknowledge messages", e))
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
        let mut conn = self.conn.clone();
        let reply: StreamAutoClaimReply = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to claim idle messages", e))?;

        if !reply.claimed.is_empty() || !reply.deleted_ids.is_empty() {
            trace!(
                stream,
                group,
                consumer,
                claimed = reply.claimed.len(),
                trimmed = reply.deleted_ids.len(),
                next = %reply.next_stream_id,
                "xautoclaim"
            );
        }
        Ok(ClaimedBatch {
            next_cursor: reply.next_stream_id,
            messages: reply.claimed.into_iter().map(into_message).collect(),
        })
    }
}
