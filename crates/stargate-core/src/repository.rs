use crate::error::StorageError;
use crate::link::{GotoRecord, LinkRecord};
use crate::shortcode::{FullShortUrl, ShortCode};
use async_trait::async_trait;

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// CRUD contract over horizontally partitioned link storage.
///
/// Link rows live in the shard chosen by `gid`; goto rows live in the shard
/// chosen by `full_short_url`. Methods taking a `gid` are routed to exactly
/// one partition. Methods named `*_unscoped` or scanning every short code
/// fan out to all partitions and are meant for administrative use.
#[async_trait]
pub trait LinkRepository: Send + Sync + 'static {
    /// Inserts a link and its goto index row.
    ///
    /// Returns `Err(Conflict)` if the full short URL is already taken.
    async fn insert(&self, link: &LinkRecord, goto: &GotoRecord) -> Result<()>;

    /// Looks up which group holds `full_short_url`.
    async fn find_goto(&self, full_short_url: &FullShortUrl) -> Result<Option<GotoRecord>>;

    /// Fetches a link from the shard owning `gid`.
    ///
    /// Soft-deleted and disabled rows are returned as-is; callers decide how
    /// to treat them.
    async fn find_link(&self, gid: &str, full_short_url: &FullShortUrl)
        -> Result<Option<LinkRecord>>;

    /// Authoritative existence check, including soft-deleted links.
    async fn exists(&self, full_short_url: &FullShortUrl) -> Result<bool>;

    /// Sets or clears the disabled flag. Returns `true` if a row changed.
    async fn set_disabled(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
        disabled: bool,
    ) -> Result<bool>;

    /// Marks a link as deleted. Returns `true` if a live row was deleted.
    async fn soft_delete(&self, gid: &str, full_short_url: &FullShortUrl) -> Result<bool>;

    /// Finds a link without knowing its group by scanning every link shard.
    async fn find_link_unscoped(&self, full_short_url: &FullShortUrl)
        -> Result<Option<LinkRecord>>;

    /// Lists every short code ever issued, across all link shards.
    async fn all_short_codes(&self) -> Result<Vec<ShortCode>>;
}
