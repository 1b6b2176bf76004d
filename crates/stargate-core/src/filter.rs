use crate::error::CacheError;
use async_trait::async_trait;

/// Type alias for filter results.
pub type Result<T> = std::result::Result<T, CacheError>;

/// A probabilistic set-membership filter over issued short codes.
///
/// Answers "definitely absent" or "possibly present". Entries can only be
/// added; [`ExistenceFilter::rebuild`] is the only way to shrink the set.
#[async_trait]
pub trait ExistenceFilter: Send + Sync + 'static {
    /// Returns `false` only when `key` was never added.
    async fn might_contain(&self, key: &str) -> Result<bool>;

    async fn insert(&self, key: &str) -> Result<()>;

    /// Drops every entry and repopulates the filter from `keys`.
    async fn rebuild(&self, keys: &[String]) -> Result<()>;
}
