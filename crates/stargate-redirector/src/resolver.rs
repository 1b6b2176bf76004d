use crate::error::ResolveError;
use crate::visit::VisitContext;
use async_trait::async_trait;
use jiff::Timestamp;
use stargate_core::cache::{goto_key, null_goto_key, NULL_MARKER};
use stargate_core::link::DEFAULT_CACHE_TTL;
use stargate_core::{
    Availability, CacheStore, FullShortUrl, IpLocator, LinkRecord, LinkRepository, ShortCode,
    StatsSubmitter,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ResolverSettings {
    /// Domain short codes are resolved under.
    #[builder(setter(into))]
    pub domain: String,
    /// Lifetime of a "known absent" entry.
    #[builder(default = Duration::from_secs(30 * 60))]
    pub negative_ttl: Duration,
    /// Positive cache lifetime of links without an expiry.
    #[builder(default = DEFAULT_CACHE_TTL)]
    pub default_ttl: Duration,
    /// Deadline for each individual cache or storage call.
    #[builder(default = Duration::from_millis(500))]
    pub backend_timeout: Duration,
}

/// Resolves short codes to origin URLs.
#[async_trait]
pub trait Redirector: Send + Sync + 'static {
    async fn resolve(&self, code: &str, visit: &VisitContext) -> Result<String, ResolveError>;
}

/// A failed or timed-out backend call.
#[derive(Debug)]
struct Degraded(String);

/// Cache-aside resolver over the sharded store.
///
/// Lookup order is positive cache, negative cache, goto index, link shard.
/// A cache that errors or times out counts as a miss. Unresolvable and
/// unavailable links are remembered in the negative cache so repeated
/// requests for them do not reach storage.
pub struct Resolver {
    repository: Arc<dyn LinkRepository>,
    cache: Arc<dyn CacheStore>,
    stats: Arc<dyn StatsSubmitter>,
    locator: Option<Arc<dyn IpLocator>>,
    settings: ResolverSettings,
}

impl Resolver {
    pub fn new(
        repository: Arc<dyn LinkRepository>,
        cache: Arc<dyn CacheStore>,
        stats: Arc<dyn StatsSubmitter>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            repository,
            cache,
            stats,
            locator: None,
            settings,
        }
    }

    /// Fills in the locale of visits that arrive without one.
    pub fn with_locator(mut self, locator: Arc<dyn IpLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    async fn bounded<T, E, F>(&self, operation: &str, call: F) -> Result<T, Degraded>
    where
        E: std::fmt::Display,
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(self.settings.backend_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(Degraded(format!("{operation}: {err}"))),
            Err(_) => Err(Degraded(format!(
                "{operation}: timed out after {:?}",
                self.settings.backend_timeout
            ))),
        }
    }

    async fn remember_absent(&self, url: &FullShortUrl) {
        let key = null_goto_key(url);
        let written = self.bounded(
            "negative cache write",
            self.cache
                .set_if_absent(&key, NULL_MARKER, self.settings.negative_ttl),
        );
        if let Err(Degraded(reason)) = written.await {
            warn!(full_short_url = %url, %reason, "could not write negative cache entry");
        }
    }

    async fn remember_link(&self, link: &LinkRecord, now: Timestamp) {
        let ttl = link.valid_date.cache_ttl(now, self.settings.default_ttl);
        let key = goto_key(&link.full_short_url);
        let written = self.bounded(
            "cache write",
            self.cache.set(&key, &link.origin_url, ttl),
        );
        match written.await {
            Ok(()) => trace!(full_short_url = %link.full_short_url, ttl_secs = ttl.as_secs(), "cached link"),
            Err(Degraded(reason)) => {
                warn!(full_short_url = %link.full_short_url, %reason, "could not cache link")
            }
        }
    }

    /// Hands a click event to the stats pipeline without waiting on it.
    ///
    /// A cache hit does not know the link's group, so the event is built
    /// once the goto index has been consulted off the request path.
    fn emit(&self, url: FullShortUrl, gid: Option<String>, visit: &VisitContext) {
        let now = Timestamp::now();
        let locator = self
            .locator
            .as_ref()
            .filter(|_| visit.locale.trim().is_empty() && !visit.ip.is_empty())
            .map(Arc::clone);

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                match gid {
                    Some(gid) => self.stats.submit(visit.to_event(url, gid, now)),
                    None => warn!(full_short_url = %url, "no runtime to resolve stats group, dropping event"),
                }
                return;
            }
        };
        if let (Some(gid), None) = (&gid, &locator) {
            self.stats.submit(visit.to_event(url, gid.clone(), now));
            return;
        }

        let repository = Arc::clone(&self.repository);
        let stats = Arc::clone(&self.stats);
        let mut visit = visit.clone();
        runtime.spawn(async move {
            let gid = match gid {
                Some(gid) => gid,
                None => match repository.find_goto(&url).await {
                    Ok(Some(goto)) => goto.gid,
                    Ok(None) => {
                        warn!(full_short_url = %url, "cached link has no goto row, dropping stats event");
                        return;
                    }
                    Err(err) => {
                        error!(full_short_url = %url, error = %err, "failed to resolve stats group, dropping event");
                        return;
                    }
                },
            };
            if let Some(locator) = locator {
                match locator.locate(&visit.ip).await {
                    Some(locale) => visit.locale = locale.formatted(),
                    None => trace!(ip = %visit.ip, provider = locator.name(), "no location for visitor"),
                }
            }
            stats.submit(visit.to_event(url, gid, now));
        });
    }

    /// Storage half of a lookup. `cache_down` tells whether the cache
    /// already failed, which decides if a storage failure is fatal.
    async fn resolve_from_storage(
        &self,
        url: &FullShortUrl,
        cache_down: bool,
        visit: &VisitContext,
    ) -> Result<String, ResolveError> {
        let storage_failed = |reason: String| {
            if cache_down {
                error!(full_short_url = %url, %reason, "cache and storage both unavailable");
                ResolveError::Internal(reason)
            } else {
                warn!(full_short_url = %url, %reason, "storage unavailable, reporting not found");
                ResolveError::NotFound
            }
        };

        let goto = self
            .bounded("goto lookup", self.repository.find_goto(url))
            .await
            .map_err(|Degraded(reason)| storage_failed(reason))?;
        let Some(goto) = goto else {
            debug!(full_short_url = %url, "no goto row");
            self.remember_absent(url).await;
            return Err(ResolveError::NotFound);
        };

        let link = self
            .bounded("link lookup", self.repository.find_link(&goto.gid, url))
            .await
            .map_err(|Degraded(reason)| storage_failed(reason))?;
        let Some(link) = link else {
            error!(full_short_url = %url, gid = %goto.gid, "goto row points at a missing link");
            self.remember_absent(url).await;
            return Err(ResolveError::NotFound);
        };

        let now = Timestamp::now();
        let verdict = match link.availability(now) {
            Availability::Live => None,
            Availability::Deleted => Some(ResolveError::NotFound),
            Availability::Disabled | Availability::Expired => Some(ResolveError::Forbidden),
        };
        if let Some(err) = verdict {
            debug!(full_short_url = %url, availability = ?link.availability(now), "link not resolvable");
            self.remember_absent(url).await;
            return Err(err);
        }

        self.remember_link(&link, now).await;
        debug!(full_short_url = %url, "resolved from storage");
        self.emit(url.clone(), Some(link.gid), visit);
        Ok(link.origin_url)
    }
}

#[async_trait]
impl Redirector for Resolver {
    async fn resolve(&self, code: &str, visit: &VisitContext) -> Result<String, ResolveError> {
        let Ok(code) = ShortCode::new(code) else {
            trace!(code, "malformed short code");
            return Err(ResolveError::NotFound);
        };
        let url = FullShortUrl::new(&self.settings.domain, &code);
        trace!(full_short_url = %url, "resolving");

        let mut cache_down = false;
        match self
            .bounded("cache read", self.cache.get(&goto_key(&url)))
            .await
        {
            Ok(Some(origin_url)) => {
                debug!(full_short_url = %url, "cache hit");
                self.emit(url, None, visit);
                return Ok(origin_url);
            }
            Ok(None) => {}
            Err(Degraded(reason)) => {
                warn!(full_short_url = %url, %reason, "cache read failed, falling through");
                cache_down = true;
            }
        }

        if !cache_down {
            match self
                .bounded("negative cache read", self.cache.get(&null_goto_key(&url)))
                .await
            {
                Ok(Some(_)) => {
                    debug!(full_short_url = %url, "negative cache hit");
                    return Err(ResolveError::NotFound);
                }
                Ok(None) => {}
                Err(Degraded(reason)) => {
                    warn!(full_short_url = %url, %reason, "negative cache read failed, falling through");
                    cache_down = true;
                }
            }
        }

        self.resolve_from_storage(&url, cache_down, visit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::SignedDuration;
    use parking_lot::Mutex;
    use stargate_cache::MokaCacheStore;
    use stargate_core::{
        CacheError, GotoRecord, StatsEvent, StorageError, ValidDate,
    };
    use stargate_storage::{InMemoryLinkStore, ShardRouter};
    use std::sync::atomic::{AtomicBool, Ordering};

    const DOMAIN: &str = "nurl.ink";

    /// Moka underneath, with recorded writes and switchable faults.
    #[derive(Default)]
    struct TestCache {
        inner: MokaCacheStore,
        writes: Mutex<Vec<(String, Duration)>>,
        failing: AtomicBool,
        stalled: AtomicBool,
    }

    impl TestCache {
        async fn fault(&self) -> stargate_core::cache::Result<()> {
            if self.stalled.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(10)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(CacheError::Unavailable("connection refused".to_string()));
            }
            Ok(())
        }

        fn ttl_of(&self, key: &str) -> Option<Duration> {
            self.writes
                .lock()
                .iter()
                .rev()
                .find(|(written, _)| written == key)
                .map(|(_, ttl)| *ttl)
        }
    }

    #[async_trait]
    impl CacheStore for TestCache {
        async fn get(&self, key: &str) -> stargate_core::cache::Result<Option<String>> {
            self.fault().await?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> stargate_core::cache::Result<()> {
            self.fault().await?;
            self.writes.lock().push((key.to_string(), ttl));
            self.inner.set(key, value, ttl).await
        }

        async fn set_if_absent(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> stargate_core::cache::Result<bool> {
            self.fault().await?;
            self.writes.lock().push((key.to_string(), ttl));
            self.inner.set_if_absent(key, value, ttl).await
        }

        async fn del(&self, key: &str) -> stargate_core::cache::Result<()> {
            self.fault().await?;
            self.inner.del(key).await
        }
    }

    #[derive(Default)]
    struct RecordingStats {
        events: Mutex<Vec<StatsEvent>>,
    }

    impl StatsSubmitter for RecordingStats {
        fn submit(&self, event: StatsEvent) {
            self.events.lock().push(event);
        }
    }

    struct DownRepository;

    fn down<T>() -> stargate_core::repository::Result<T> {
        Err(StorageError::Unavailable("pool closed".to_string()))
    }

    #[async_trait]
    impl LinkRepository for DownRepository {
        async fn insert(&self, _: &LinkRecord, _: &GotoRecord) -> stargate_core::repository::Result<()> {
            down()
        }
        async fn find_goto(&self, _: &FullShortUrl) -> stargate_core::repository::Result<Option<GotoRecord>> {
            down()
        }
        async fn find_link(
            &self,
            _: &str,
            _: &FullShortUrl,
        ) -> stargate_core::repository::Result<Option<LinkRecord>> {
            down()
        }
        async fn exists(&self, _: &FullShortUrl) -> stargate_core::repository::Result<bool> {
            down()
        }
        async fn set_disabled(
            &self,
            _: &str,
            _: &FullShortUrl,
            _: bool,
        ) -> stargate_core::repository::Result<bool> {
            down()
        }
        async fn soft_delete(&self, _: &str, _: &FullShortUrl) -> stargate_core::repository::Result<bool> {
            down()
        }
        async fn find_link_unscoped(
            &self,
            _: &FullShortUrl,
        ) -> stargate_core::repository::Result<Option<LinkRecord>> {
            down()
        }
        async fn all_short_codes(&self) -> stargate_core::repository::Result<Vec<ShortCode>> {
            down()
        }
    }

    struct Harness {
        store: Arc<InMemoryLinkStore>,
        cache: Arc<TestCache>,
        stats: Arc<RecordingStats>,
        resolver: Resolver,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryLinkStore::new(ShardRouter::new(4).unwrap()));
        harness_on(store.clone(), store)
    }

    fn harness_on(store: Arc<InMemoryLinkStore>, repository: Arc<dyn LinkRepository>) -> Harness {
        let cache = Arc::new(TestCache::default());
        let stats = Arc::new(RecordingStats::default());
        let settings = ResolverSettings::builder()
            .domain(DOMAIN)
            .backend_timeout(Duration::from_millis(100))
            .build();
        Harness {
            resolver: Resolver::new(repository, cache.clone(), stats.clone(), settings),
            store,
            cache,
            stats,
        }
    }

    fn link(code: &str, origin_url: &str) -> LinkRecord {
        let code = ShortCode::new_unchecked(code);
        let now = Timestamp::now();
        LinkRecord {
            id: 1,
            gid: "g1".to_string(),
            domain: DOMAIN.to_string(),
            full_short_url: FullShortUrl::new(DOMAIN, &code),
            short_code: code,
            origin_url: origin_url.to_string(),
            favicon: None,
            description: None,
            disabled: false,
            deleted: false,
            deleted_at: None,
            valid_date: ValidDate::Permanent,
            total_pv: 0,
            total_uv: 0,
            total_uip: 0,
            created_at: now,
            updated_at: now,
        }
    }

    async fn seed(store: &InMemoryLinkStore, link: &LinkRecord) {
        store.insert(link, &link.goto(link.id + 1)).await.unwrap();
    }

    fn visit() -> VisitContext {
        VisitContext {
            ip: "10.0.0.1".to_string(),
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) Firefox/127.0".to_string(),
            ..VisitContext::default()
        }
    }

    fn url(code: &str) -> FullShortUrl {
        FullShortUrl::new(DOMAIN, &ShortCode::new_unchecked(code))
    }

    #[tokio::test]
    async fn live_link_resolves_and_populates_the_cache() {
        let h = harness();
        seed(&h.store, &link("abc123", "https://example.com/a")).await;

        let origin = h.resolver.resolve("abc123", &visit()).await.unwrap();

        assert_eq!(origin, "https://example.com/a");
        assert_eq!(
            h.cache.inner.get(&goto_key(&url("abc123"))).await.unwrap().as_deref(),
            Some("https://example.com/a")
        );
        let events = h.stats.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].gid, "g1");
        assert_eq!(events[0].browser, "Firefox");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cache_hit_skips_link_lookup_and_still_emits() {
        let h = harness();
        h.cache
            .inner
            .set(&goto_key(&url("abc123")), "https://cached.example", DEFAULT_CACHE_TTL)
            .await
            .unwrap();
        seed(&h.store, &link("abc123", "https://example.com/a")).await;

        let origin = h.resolver.resolve("abc123", &visit()).await.unwrap();
        assert_eq!(origin, "https://cached.example");

        awaitility::at_most(Duration::from_secs(1))
            .poll_interval(Duration::from_millis(10))
            .until_async(|| async { h.stats.events.lock().len() == 1 })
            .await;
        assert_eq!(h.stats.events.lock()[0].gid, "g1");
        // Only the off-path goto lookup for the stats group.
        assert_eq!(h.store.read_count(), 1);
    }

    #[tokio::test]
    async fn unknown_code_is_negatively_cached() {
        let h = harness();

        assert_eq!(
            h.resolver.resolve("zzzzzz", &visit()).await,
            Err(ResolveError::NotFound)
        );
        let reads = h.store.read_count();
        assert_eq!(reads, 1);
        assert_eq!(
            h.cache.ttl_of(&null_goto_key(&url("zzzzzz"))),
            Some(Duration::from_secs(30 * 60))
        );

        assert_eq!(
            h.resolver.resolve("zzzzzz", &visit()).await,
            Err(ResolveError::NotFound)
        );
        assert_eq!(h.store.read_count(), reads);
        assert!(h.stats.events.lock().is_empty());
    }

    #[tokio::test]
    async fn disabled_link_is_forbidden() {
        let h = harness();
        let mut disabled = link("abc123", "https://example.com/a");
        disabled.disabled = true;
        seed(&h.store, &disabled).await;

        assert_eq!(
            h.resolver.resolve("abc123", &visit()).await,
            Err(ResolveError::Forbidden)
        );
        assert!(h.cache.ttl_of(&null_goto_key(&url("abc123"))).is_some());
        assert!(h.cache.ttl_of(&goto_key(&url("abc123"))).is_none());
    }

    #[tokio::test]
    async fn expired_link_is_forbidden() {
        let h = harness();
        let mut expired = link("abc123", "https://example.com/a");
        expired.valid_date = ValidDate::Until(Timestamp::now() - SignedDuration::from_secs(1));
        seed(&h.store, &expired).await;

        assert_eq!(
            h.resolver.resolve("abc123", &visit()).await,
            Err(ResolveError::Forbidden)
        );
    }

    #[tokio::test]
    async fn deleted_link_is_not_found() {
        let h = harness();
        let mut deleted = link("abc123", "https://example.com/a");
        deleted.deleted = true;
        seed(&h.store, &deleted).await;

        assert_eq!(
            h.resolver.resolve("abc123", &visit()).await,
            Err(ResolveError::NotFound)
        );
    }

    #[tokio::test]
    async fn goto_without_link_is_not_found() {
        let h = harness();
        let orphan = link("abc123", "https://example.com/a");
        let goto = GotoRecord {
            id: 9,
            full_short_url: orphan.full_short_url.clone(),
            gid: "another-group".to_string(),
        };
        h.store.insert(&orphan, &goto).await.unwrap();

        assert_eq!(
            h.resolver.resolve("abc123", &visit()).await,
            Err(ResolveError::NotFound)
        );
        assert!(h.cache.ttl_of(&null_goto_key(&url("abc123"))).is_some());
    }

    #[tokio::test]
    async fn cache_ttl_never_outlives_the_expiry() {
        let h = harness();
        let mut expiring = link("abc123", "https://example.com/a");
        expiring.valid_date = ValidDate::Until(Timestamp::now() + SignedDuration::from_secs(90));
        seed(&h.store, &expiring).await;
        seed(&h.store, &link("perm01", "https://example.com/b")).await;

        h.resolver.resolve("abc123", &visit()).await.unwrap();
        h.resolver.resolve("perm01", &visit()).await.unwrap();

        let ttl = h.cache.ttl_of(&goto_key(&url("abc123"))).unwrap();
        assert!(ttl <= Duration::from_secs(90), "ttl was {ttl:?}");
        assert!(ttl >= Duration::from_secs(1));
        assert_eq!(h.cache.ttl_of(&goto_key(&url("perm01"))), Some(DEFAULT_CACHE_TTL));
    }

    #[tokio::test]
    async fn failing_cache_falls_through_to_storage() {
        let h = harness();
        seed(&h.store, &link("abc123", "https://example.com/a")).await;
        h.cache.failing.store(true, Ordering::SeqCst);

        let origin = h.resolver.resolve("abc123", &visit()).await.unwrap();

        assert_eq!(origin, "https://example.com/a");
        assert_eq!(h.stats.events.lock().len(), 1);
    }

    #[tokio::test]
    async fn stalled_cache_times_out_and_falls_through() {
        let h = harness();
        seed(&h.store, &link("abc123", "https://example.com/a")).await;
        h.cache.stalled.store(true, Ordering::SeqCst);

        let started = std::time::Instant::now();
        let origin = h.resolver.resolve("abc123", &visit()).await.unwrap();

        assert_eq!(origin, "https://example.com/a");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn storage_outage_with_a_healthy_cache_is_not_found() {
        let store = Arc::new(InMemoryLinkStore::new(ShardRouter::new(4).unwrap()));
        let h = harness_on(store, Arc::new(DownRepository));

        assert_eq!(
            h.resolver.resolve("abc123", &visit()).await,
            Err(ResolveError::NotFound)
        );
        // A storage blip must not blackhole the link for the negative TTL.
        assert!(h.cache.ttl_of(&null_goto_key(&url("abc123"))).is_none());
    }

    #[tokio::test]
    async fn every_backend_down_is_internal() {
        let store = Arc::new(InMemoryLinkStore::new(ShardRouter::new(4).unwrap()));
        let h = harness_on(store, Arc::new(DownRepository));
        h.cache.failing.store(true, Ordering::SeqCst);

        assert!(matches!(
            h.resolver.resolve("abc123", &visit()).await,
            Err(ResolveError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn malformed_codes_never_reach_a_backend() {
        let h = harness();

        assert_eq!(
            h.resolver.resolve("no/such", &visit()).await,
            Err(ResolveError::NotFound)
        );
        assert_eq!(h.store.read_count(), 0);
        assert!(h.cache.writes.lock().is_empty());
    }

    struct FixedLocator;

    #[async_trait]
    impl IpLocator for FixedLocator {
        async fn locate(&self, ip: &str) -> Option<stargate_core::Locale> {
            (ip == "203.0.113.7").then(|| stargate_core::Locale {
                province: "Zhejiang".to_string(),
                city: "Hangzhou".to_string(),
                adcode: String::new(),
            })
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn locating(mut h: Harness) -> Harness {
        let settings = h.resolver.settings().clone();
        h.resolver = Resolver::new(h.store.clone(), h.cache.clone(), h.stats.clone(), settings)
            .with_locator(Arc::new(FixedLocator));
        h
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn located_visits_carry_a_locale_row() {
        let h = locating(harness());
        seed(&h.store, &link("abc123", "https://example.com/a")).await;
        let visit = VisitContext {
            ip: "203.0.113.7".to_string(),
            ..visit()
        };

        h.resolver.resolve("abc123", &visit).await.unwrap();

        awaitility::at_most(Duration::from_secs(1))
            .poll_interval(Duration::from_millis(10))
            .until_async(|| async { h.stats.events.lock().len() == 1 })
            .await;
        let event = h.stats.events.lock()[0].clone();
        assert_eq!(event.locale, "Zhejiang,Hangzhou");
        let locale = event
            .dimension_rows()
            .into_iter()
            .find_map(|row| match row.dimension {
                stargate_core::Dimension::Locale(locale) => Some(locale),
                _ => None,
            })
            .unwrap();
        assert_eq!(locale.province, "Zhejiang");
        assert_eq!(locale.city, "Hangzhou");
    }

    #[tokio::test]
    async fn locale_from_the_request_is_kept() {
        let h = locating(harness());
        seed(&h.store, &link("abc123", "https://example.com/a")).await;
        let visit = VisitContext {
            ip: "203.0.113.7".to_string(),
            locale: "Guangdong,Shenzhen".to_string(),
            ..visit()
        };

        h.resolver.resolve("abc123", &visit).await.unwrap();

        let events = h.stats.events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].locale, "Guangdong,Shenzhen");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unlocatable_visits_are_still_counted() {
        let h = locating(harness());
        seed(&h.store, &link("abc123", "https://example.com/a")).await;

        h.resolver.resolve("abc123", &visit()).await.unwrap();

        awaitility::at_most(Duration::from_secs(1))
            .poll_interval(Duration::from_millis(10))
            .until_async(|| async { h.stats.events.lock().len() == 1 })
            .await;
        let event = h.stats.events.lock()[0].clone();
        assert!(event.locale.is_empty());
        assert!(event
            .dimension_rows()
            .iter()
            .all(|row| row.dimension.kind() != "locale"));
    }
}
