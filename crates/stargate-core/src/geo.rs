use crate::stats::Locale;
use async_trait::async_trait;

/// Resolves a client IP to the region it belongs to.
///
/// Lookups never fail loudly: an unparseable address, a private range or a
/// database miss all come back as `None` and the visit is recorded without
/// a locale.
#[async_trait]
pub trait IpLocator: Send + Sync + 'static {
    async fn locate(&self, ip: &str) -> Option<Locale>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}
