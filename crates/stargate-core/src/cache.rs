use crate::error::CacheError;
use crate::shortcode::FullShortUrl;
use async_trait::async_trait;
use std::time::Duration;

/// Value stored under a negative entry.
pub const NULL_MARKER: &str = "-";

/// Positive entry: `full_short_url -> origin_url`.
pub fn goto_key(full_short_url: &FullShortUrl) -> String {
    format!("short-link:goto:{full_short_url}")
}

/// Negative entry marking a link as unresolvable.
pub fn null_goto_key(full_short_url: &FullShortUrl) -> String {
    format!("short-link:is-null:goto_{full_short_url}")
}

/// Type alias for cache results.
pub type Result<T> = std::result::Result<T, CacheError>;

/// A string key-value cache with an independent TTL per key.
///
/// Implementations can use Redis, in-memory caches, or other backends. The
/// resolver keeps both positive and negative entries here.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Returns `Ok(None)` if the key is not in the cache.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous entry.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Stores `value` only when `key` is absent.
    ///
    /// Returns `true` if this call wrote the entry.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Removes an entry. It is not an error if the key does not exist.
    async fn del(&self, key: &str) -> Result<()>;
}
