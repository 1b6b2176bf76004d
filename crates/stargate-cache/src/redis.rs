use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use stargate_core::cache::{CacheStore, Result};
use stargate_core::error::CacheError;
use std::time::Duration;
use tracing::{trace, warn};

/// A [`CacheStore`] over a shared Redis deployment.
///
/// Values are stored as plain strings with `SET key value EX ttl`, so other
/// services reading the same keyspace see exactly what the resolver wrote.
#[derive(Debug, Clone)]
pub struct RedisCacheStore {
    conn: MultiplexedConnection,
}

pub(crate) fn map_redis_error(operation: &str, err: redis::RedisError) -> CacheError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() {
        CacheError::Timeout(message)
    } else if err.is_connection_dropped() || err.is_connection_refusal() || err.is_io_error() {
        CacheError::Unavailable(message)
    } else {
        CacheError::Operation(message)
    }
}

/// Redis expiries have whole-second resolution. Anything shorter than a
/// second still has to expire, so it rounds up to one.
pub(crate) fn ttl_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

impl RedisCacheStore {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        trace!(key, "redis get");
        let mut conn = self.conn.clone();
        conn.get::<_, Option<String>>(key).await.map_err(|e| {
            warn!(key, error = %e, "redis get failed");
            map_redis_error("failed to fetch value from Redis", e)
        })
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        trace!(key, ttl_secs = ttl_seconds(ttl), "redis set");
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds(ttl))
            .await
            .map_err(|e| {
                warn!(key, error = %e, "redis set failed");
                map_redis_error("failed to write value to Redis", e)
            })
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to write value to Redis", e))?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> Result<()> {
        trace!(key, "redis del");
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(|e| {
            warn!(key, error = %e, "redis del failed");
            map_redis_error("failed to delete value from Redis", e)
        })
    }
}
