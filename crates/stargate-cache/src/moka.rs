use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;
use stargate_core::cache::{CacheStore, Result};
use std::time::{Duration, Instant};
use tracing::trace;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    ttl: Duration,
}

/// Expires each entry after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, Entry> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &Entry, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct MokaCacheConfig {
    /// Maximum number of entries the cache can hold.
    #[builder(default = 100_000)]
    pub max_capacity: u64,
}

/// An in-process [`CacheStore`] for single-node deployments and tests.
///
/// Unlike a fixed cache-wide TTL, every key keeps the TTL passed to
/// [`CacheStore::set`], so positive and negative entries can coexist.
#[derive(Clone)]
pub struct MokaCacheStore {
    cache: Cache<String, Entry>,
}

impl MokaCacheStore {
    pub fn new(config: MokaCacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { cache }
    }
}

impl Default for MokaCacheStore {
    fn default() -> Self {
        Self::new(MokaCacheConfig::builder().build())
    }
}

#[async_trait]
impl CacheStore for MokaCacheStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let hit = self.cache.get(key).await.map(|entry| entry.value);
        trace!(key, hit = hit.is_some(), "moka get");
        Ok(hit)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let entry = Entry {
            value: value.to_string(),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let entry = self
            .cache
            .entry(key.to_string())
            .or_insert_with(async {
                Entry {
                    value: value.to_string(),
                    ttl,
                }
            })
            .await;
        Ok(entry.is_fresh())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }
}
