use crate::redis::{map_redis_error, ttl_seconds};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use redis::aio::MultiplexedConnection;
use stargate_core::error::CacheError;
use stargate_core::shortcode::FullShortUrl;
use stargate_core::stats::VisitorTracker;
use std::time::Duration;

/// How long a visitor or IP is remembered after its last visit.
pub const VISITOR_TTL: Duration = Duration::from_secs(90 * 24 * 60 * 60);

const UV_PREFIX: &str = "short-link:stats:uv:";
const UIP_PREFIX: &str = "short-link:stats:uip:";

/// Tracks visitors in one Redis set per link, refreshing its expiry on
/// every visit.
#[derive(Debug, Clone)]
pub struct RedisVisitorTracker {
    conn: MultiplexedConnection,
    ttl: Duration,
}

impl RedisVisitorTracker {
    pub fn new(conn: MultiplexedConnection) -> Self {
        Self::with_ttl(conn, VISITOR_TTL)
    }

    pub fn with_ttl(conn: MultiplexedConnection, ttl: Duration) -> Self {
        Self { conn, ttl }
    }

    async fn record(&self, key: String, member: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let (added,): (i64,) = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(&key)
            .arg(member)
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl_seconds(self.ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to record visitor", e))?;
        Ok(added == 1)
    }
}

#[async_trait]
impl VisitorTracker for RedisVisitorTracker {
    async fn record_visitor(
        &self,
        full_short_url: &FullShortUrl,
        visitor_id: &str,
    ) -> Result<bool, CacheError> {
        self.record(format!("{UV_PREFIX}{full_short_url}"), visitor_id)
            .await
    }

    async fn record_ip(&self, full_short_url: &FullShortUrl, ip: &str) -> Result<bool, CacheError> {
        self.record(format!("{UIP_PREFIX}{full_short_url}"), ip).await
    }
}

/// Process-local tracker. Entries never expire.
#[derive(Debug, Default)]
pub struct InMemoryVisitorTracker {
    visitors: DashMap<FullShortUrl, DashSet<String>>,
    ips: DashMap<FullShortUrl, DashSet<String>>,
}

impl InMemoryVisitorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(
        sets: &DashMap<FullShortUrl, DashSet<String>>,
        full_short_url: &FullShortUrl,
        member: &str,
    ) -> bool {
        sets.entry(full_short_url.clone())
            .or_default()
            .insert(member.to_string())
    }
}

#[async_trait]
impl VisitorTracker for InMemoryVisitorTracker {
    async fn record_visitor(
        &self,
        full_short_url: &FullShortUrl,
        visitor_id: &str,
    ) -> Result<bool, CacheError> {
        Ok(Self::record(&self.visitors, full_short_url, visitor_id))
    }

    async fn record_ip(&self, full_short_url: &FullShortUrl, ip: &str) -> Result<bool, CacheError> {
        Ok(Self::record(&self.ips, full_short_url, ip))
    }
}
