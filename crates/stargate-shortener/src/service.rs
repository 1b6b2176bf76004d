use crate::error::ShortenerError;
use crate::hash::hash_to_base62;
use jiff::Timestamp;
use serde::Deserialize;
use stargate_core::cache::{goto_key, null_goto_key};
use stargate_core::link::DEFAULT_CACHE_TTL;
use stargate_core::{
    Availability, CacheStore, ExistenceFilter, FullShortUrl, LinkRecord, LinkRepository,
    ShortCode, ValidDate,
};
use stargate_snowflake::IdGenerator;
use std::sync::Arc;
use tracing::{debug, info, warn};
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, TypedBuilder)]
pub struct ShortenerSettings {
    /// Domain every issued link is published under, e.g. `nurl.ink`.
    #[builder(setter(into))]
    pub domain: String,
    #[builder(default = 10)]
    pub max_attempts: u32,
    #[builder(default, setter(strip_option, into))]
    pub default_favicon: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateLinkRequest {
    pub gid: String,
    pub origin_url: String,
    #[serde(default = "permanent")]
    pub valid_date: ValidDate,
    #[serde(default)]
    pub favicon: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn permanent() -> ValidDate {
    ValidDate::Permanent
}

enum Candidate {
    Free(ShortCode),
    /// The URL is already shortened in the same group.
    Existing(LinkRecord),
}

/// Issues short links and runs their lifecycle transitions.
///
/// Codes come from a hash of the origin URL, so the same URL in the same
/// group always maps to the same link. A code held by another URL or group
/// is salted and rehashed.
pub struct LinkService {
    repository: Arc<dyn LinkRepository>,
    filter: Arc<dyn ExistenceFilter>,
    cache: Arc<dyn CacheStore>,
    ids: Arc<dyn IdGenerator>,
    settings: ShortenerSettings,
}

impl LinkService {
    pub fn new(
        repository: Arc<dyn LinkRepository>,
        filter: Arc<dyn ExistenceFilter>,
        cache: Arc<dyn CacheStore>,
        ids: Arc<dyn IdGenerator>,
        settings: ShortenerSettings,
    ) -> Self {
        Self {
            repository,
            filter,
            cache,
            ids,
            settings,
        }
    }

    pub fn domain(&self) -> &str {
        &self.settings.domain
    }

    fn validate_url(url: &str) -> Result<(), ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::InvalidUrl("URL cannot be empty".to_string()));
        }

        let Some((scheme, rest)) = url.split_once("://") else {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {url}"
            )));
        };
        if scheme.is_empty() || rest.is_empty() || rest.starts_with('/') {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL must have a valid scheme and host: {url}"
            )));
        }

        let scheme = scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(ShortenerError::InvalidUrl(format!(
                "URL scheme must be http or https: {scheme}"
            )));
        }

        Ok(())
    }

    /// Custom expiries must lie in the future.
    fn validate_valid_date(valid_date: ValidDate, now: Timestamp) -> Result<(), ShortenerError> {
        match valid_date.until() {
            Some(until) if until <= now => Err(ShortenerError::InvalidValidDate(format!(
                "expiry {until} is not in the future"
            ))),
            _ => Ok(()),
        }
    }

    /// Input hashed on the given attempt. The first attempt is the bare URL.
    fn hash_input(origin_url: &str, attempt: u32) -> String {
        if attempt == 0 {
            origin_url.to_string()
        } else {
            format!("{origin_url}{:016x}", rand::random::<u64>())
        }
    }

    /// Runs the existence gate for one candidate code.
    ///
    /// Returns `None` when the code belongs to a different link.
    async fn check_candidate(
        &self,
        code: ShortCode,
        gid: &str,
        origin_url: &str,
    ) -> Result<Option<Candidate>, ShortenerError> {
        let possibly_present = match self.filter.might_contain(code.as_str()).await {
            Ok(present) => present,
            Err(e) => {
                warn!(code = %code, error = %e, "existence filter unavailable, checking storage");
                true
            }
        };
        if !possibly_present {
            return Ok(Some(Candidate::Free(code)));
        }

        let full_short_url = FullShortUrl::new(&self.settings.domain, &code);
        let Some(goto) = self.repository.find_goto(&full_short_url).await? else {
            debug!(code = %code, "filter false positive");
            return Ok(Some(Candidate::Free(code)));
        };

        if goto.gid == gid {
            if let Some(existing) = self.repository.find_link(gid, &full_short_url).await? {
                if existing.origin_url == origin_url && !existing.deleted {
                    return Ok(Some(Candidate::Existing(existing)));
                }
            }
        }
        debug!(code = %code, "short code collision");
        Ok(None)
    }

    /// Creates a short link, or returns the live link for the same URL in
    /// the same group.
    pub async fn create_link(
        &self,
        request: CreateLinkRequest,
    ) -> Result<LinkRecord, ShortenerError> {
        Self::validate_url(&request.origin_url)?;
        Self::validate_valid_date(request.valid_date, Timestamp::now())?;
        let max_attempts = self.settings.max_attempts;

        for attempt in 0..max_attempts {
            let code = hash_to_base62(&Self::hash_input(&request.origin_url, attempt));
            let code = match self
                .check_candidate(code, &request.gid, &request.origin_url)
                .await?
            {
                Some(Candidate::Free(code)) => code,
                Some(Candidate::Existing(link)) => {
                    debug!(full_short_url = %link.full_short_url, "reusing existing link");
                    return Ok(link);
                }
                None => continue,
            };

            match self.insert(code, &request).await {
                Ok(link) => return Ok(link),
                // Another creator took the code between the gate and
                // the insert.
                Err(ShortenerError::Conflict(url)) => {
                    debug!(full_short_url = %url, attempt, "lost insert race, salting");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(origin_url = %request.origin_url, attempts = max_attempts, "short code space exhausted");
        Err(ShortenerError::CodeSpaceExhausted {
            attempts: max_attempts,
        })
    }

    async fn insert(
        &self,
        code: ShortCode,
        request: &CreateLinkRequest,
    ) -> Result<LinkRecord, ShortenerError> {
        let now = Timestamp::now();
        let link = LinkRecord {
            id: self.ids.next_id()?,
            gid: request.gid.clone(),
            domain: self.settings.domain.clone(),
            full_short_url: FullShortUrl::new(&self.settings.domain, &code),
            short_code: code,
            origin_url: request.origin_url.clone(),
            favicon: request
                .favicon
                .clone()
                .or_else(|| self.settings.default_favicon.clone()),
            description: request.description.clone(),
            disabled: false,
            deleted: false,
            deleted_at: None,
            valid_date: request.valid_date,
            total_pv: 0,
            total_uv: 0,
            total_uip: 0,
            created_at: now,
            updated_at: now,
        };
        let goto = link.goto(self.ids.next_id()?);

        self.repository.insert(&link, &goto).await?;

        if let Err(e) = self.filter.insert(link.short_code.as_str()).await {
            warn!(code = %link.short_code, error = %e, "failed to add code to existence filter");
        }
        self.warm_cache(&link, now).await;

        info!(full_short_url = %link.full_short_url, gid = %link.gid, "link created");
        Ok(link)
    }

    async fn warm_cache(&self, link: &LinkRecord, now: Timestamp) {
        if link.availability(now) != Availability::Live {
            debug!(full_short_url = %link.full_short_url, "link not live, cache left cold");
            return;
        }
        let ttl = link.valid_date.cache_ttl(now, DEFAULT_CACHE_TTL);
        // A lookup before creation may have left a negative entry behind.
        if let Err(e) = self.cache.del(&null_goto_key(&link.full_short_url)).await {
            warn!(full_short_url = %link.full_short_url, error = %e, "failed to clear negative cache");
        }
        if let Err(e) = self
            .cache
            .set(&goto_key(&link.full_short_url), &link.origin_url, ttl)
            .await
        {
            warn!(full_short_url = %link.full_short_url, error = %e, "failed to warm cache");
        }
    }

    async fn invalidate(&self, full_short_url: &FullShortUrl) {
        for key in [goto_key(full_short_url), null_goto_key(full_short_url)] {
            if let Err(e) = self.cache.del(&key).await {
                warn!(%key, error = %e, "failed to invalidate cache entry");
            }
        }
    }

    /// Moves a link into or out of the recycle bin.
    ///
    /// Returns `false` when no live link matched.
    pub async fn set_disabled(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
        disabled: bool,
    ) -> Result<bool, ShortenerError> {
        let changed = self
            .repository
            .set_disabled(gid, full_short_url, disabled)
            .await?;
        if changed {
            self.invalidate(full_short_url).await;
            info!(%full_short_url, gid, disabled, "link status changed");
        }
        Ok(changed)
    }

    pub async fn soft_delete(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
    ) -> Result<bool, ShortenerError> {
        let deleted = self.repository.soft_delete(gid, full_short_url).await?;
        if deleted {
            self.invalidate(full_short_url).await;
            info!(%full_short_url, gid, "link deleted");
        }
        Ok(deleted)
    }

    /// Looks a link up by code alone, scanning every shard.
    pub async fn lookup(&self, code: &ShortCode) -> Result<Option<LinkRecord>, ShortenerError> {
        let full_short_url = FullShortUrl::new(&self.settings.domain, code);
        Ok(self.repository.find_link_unscoped(&full_short_url).await?)
    }

    /// Replaces the existence filter contents with every stored code.
    /// Returns how many codes were loaded.
    pub async fn rebuild_filter(&self) -> Result<usize, ShortenerError> {
        let codes: Vec<String> = self
            .repository
            .all_short_codes()
            .await?
            .into_iter()
            .map(|code| code.as_str().to_string())
            .collect();
        self.filter
            .rebuild(&codes)
            .await
            .map_err(ShortenerError::Filter)?;
        info!(codes = codes.len(), "existence filter rebuilt");
        Ok(codes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use jiff::SignedDuration;
    use stargate_cache::{BloomExistenceFilter, BloomFilterConfig, MokaCacheStore};
    use stargate_core::filter::Result as FilterResult;
    use stargate_core::GotoRecord;
    use stargate_snowflake::{Snowflake, SnowflakeSettings};
    use stargate_storage::{InMemoryLinkStore, ShardRouter};
    use std::time::Duration;

    /// Claims every key might be present, forcing the storage check.
    struct SaturatedFilter;

    #[async_trait]
    impl ExistenceFilter for SaturatedFilter {
        async fn might_contain(&self, _key: &str) -> FilterResult<bool> {
            Ok(true)
        }

        async fn insert(&self, _key: &str) -> FilterResult<()> {
            Ok(())
        }

        async fn rebuild(&self, _keys: &[String]) -> FilterResult<()> {
            Ok(())
        }
    }

    struct Harness {
        store: Arc<InMemoryLinkStore>,
        cache: Arc<MokaCacheStore>,
        filter: Arc<BloomExistenceFilter>,
        service: LinkService,
    }

    fn harness_with(
        filter: Option<Arc<dyn ExistenceFilter>>,
        max_attempts: u32,
    ) -> Harness {
        let store = Arc::new(InMemoryLinkStore::new(ShardRouter::new(4).unwrap()));
        let cache = Arc::new(MokaCacheStore::default());
        let bloom = Arc::new(
            BloomExistenceFilter::new(BloomFilterConfig::builder().expected_items(10_000).build())
                .unwrap(),
        );
        let ids = Arc::new(Snowflake::new(SnowflakeSettings::builder().node_id(1).build()).unwrap());
        let service = LinkService::new(
            store.clone(),
            filter.unwrap_or_else(|| bloom.clone() as Arc<dyn ExistenceFilter>),
            cache.clone(),
            ids,
            ShortenerSettings::builder()
                .domain("nurl.ink")
                .max_attempts(max_attempts)
                .build(),
        );
        Harness {
            store,
            cache,
            filter: bloom,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(None, 10)
    }

    fn request(gid: &str, url: &str) -> CreateLinkRequest {
        CreateLinkRequest {
            gid: gid.to_string(),
            origin_url: url.to_string(),
            valid_date: ValidDate::Permanent,
            favicon: None,
            description: None,
        }
    }

    /// Stores a link under `code` directly, bypassing the filter.
    async fn occupy(store: &InMemoryLinkStore, gid: &str, code: &ShortCode, url: &str) {
        let now = Timestamp::now();
        let link = LinkRecord {
            id: 9_000,
            gid: gid.to_string(),
            domain: "nurl.ink".to_string(),
            full_short_url: FullShortUrl::new("nurl.ink", code),
            short_code: code.clone(),
            origin_url: url.to_string(),
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
        };
        let goto = GotoRecord {
            id: 9_001,
            full_short_url: link.full_short_url.clone(),
            gid: gid.to_string(),
        };
        store.insert(&link, &goto).await.unwrap();
    }

    #[tokio::test]
    async fn first_code_is_the_plain_url_hash() {
        let h = harness();
        let link = h
            .service
            .create_link(request("g1", "https://example.com/a"))
            .await
            .unwrap();

        assert_eq!(link.short_code, hash_to_base62("https://example.com/a"));
        assert_eq!(link.full_short_url.as_str(), format!("nurl.ink/{}", link.short_code));
        assert!(h.filter.might_contain(link.short_code.as_str()).await.unwrap());
        assert!(h.store.exists(&link.full_short_url).await.unwrap());
    }

    #[tokio::test]
    async fn same_url_in_same_group_reuses_the_link() {
        let h = harness();
        let first = h
            .service
            .create_link(request("g1", "https://example.com/a"))
            .await
            .unwrap();
        let second = h
            .service
            .create_link(request("g1", "https://example.com/a"))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.full_short_url, second.full_short_url);
    }

    #[tokio::test]
    async fn same_url_in_another_group_gets_a_salted_code() {
        let h = harness();
        let first = h
            .service
            .create_link(request("g1", "https://example.com/a"))
            .await
            .unwrap();
        let second = h
            .service
            .create_link(request("g2", "https://example.com/a"))
            .await
            .unwrap();

        assert_ne!(first.short_code, second.short_code);
        assert_eq!(second.gid, "g2");
        assert!(h.store.exists(&second.full_short_url).await.unwrap());
    }

    #[tokio::test]
    async fn absent_in_filter_skips_storage_lookup() {
        let h = harness();
        h.service
            .create_link(request("g1", "https://example.com/fresh"))
            .await
            .unwrap();
        assert_eq!(h.store.read_count(), 0);
    }

    #[tokio::test]
    async fn false_positive_falls_back_to_storage() {
        let h = harness_with(Some(Arc::new(SaturatedFilter)), 10);
        let link = h
            .service
            .create_link(request("g1", "https://example.com/a"))
            .await
            .unwrap();
        assert_eq!(link.short_code, hash_to_base62("https://example.com/a"));
        assert_eq!(h.store.read_count(), 1);
    }

    #[tokio::test]
    async fn insert_conflict_missed_by_the_filter_is_salted() {
        let h = harness();
        let code = hash_to_base62("https://example.com/a");
        occupy(&h.store, "g-other", &code, "https://other.example").await;

        let link = h
            .service
            .create_link(request("g1", "https://example.com/a"))
            .await
            .unwrap();
        assert_ne!(link.short_code, code);
    }

    #[tokio::test]
    async fn exhausted_attempts_are_reported() {
        let h = harness_with(Some(Arc::new(SaturatedFilter)), 1);
        let code = hash_to_base62("https://example.com/a");
        occupy(&h.store, "g-other", &code, "https://other.example").await;

        let err = h
            .service
            .create_link(request("g1", "https://example.com/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShortenerError::CodeSpaceExhausted { attempts: 1 }));
    }

    #[tokio::test]
    async fn invalid_urls_are_rejected() {
        let h = harness();
        for url in ["", "example.com", "ftp://example.com", "https://", "http:///path"] {
            let err = h.service.create_link(request("g1", url)).await.unwrap_err();
            assert!(matches!(err, ShortenerError::InvalidUrl(_)), "{url}");
        }
    }

    #[tokio::test]
    async fn past_expiry_is_rejected_before_anything_is_stored() {
        let h = harness();
        let mut req = request("g1", "https://example.com/old");
        req.valid_date = ValidDate::Until(Timestamp::now() - SignedDuration::from_secs(60));

        let err = h.service.create_link(req).await.unwrap_err();
        assert!(matches!(err, ShortenerError::InvalidValidDate(_)));

        let url = FullShortUrl::new("nurl.ink", &hash_to_base62("https://example.com/old"));
        assert!(!h.store.exists(&url).await.unwrap());
        assert!(h.cache.get(&goto_key(&url)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn links_that_are_not_live_never_reach_the_cache() {
        let h = harness();
        let code = ShortCode::new_unchecked("exp001");
        let now = Timestamp::now();
        let link = LinkRecord {
            id: 1,
            gid: "g1".to_string(),
            domain: "nurl.ink".to_string(),
            full_short_url: FullShortUrl::new("nurl.ink", &code),
            short_code: code,
            origin_url: "https://example.com/old".to_string(),
            favicon: None,
            description: None,
            disabled: false,
            deleted: false,
            deleted_at: None,
            valid_date: ValidDate::Until(now - SignedDuration::from_secs(1)),
            total_pv: 0,
            total_uv: 0,
            total_uip: 0,
            created_at: now,
            updated_at: now,
        };

        h.service.warm_cache(&link, now).await;
        assert!(h.cache.get(&goto_key(&link.full_short_url)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn creation_warms_the_cache_and_clears_negative_entries() {
        let h = harness();
        let code = hash_to_base62("https://example.com/expiring");
        let url = FullShortUrl::new("nurl.ink", &code);
        // Left behind by a lookup of the code before the link existed.
        h.cache
            .set(&null_goto_key(&url), "-", Duration::from_secs(60))
            .await
            .unwrap();

        let mut req = request("g1", "https://example.com/expiring");
        req.valid_date = ValidDate::Until(Timestamp::now() + SignedDuration::from_secs(120));
        let link = h.service.create_link(req).await.unwrap();
        assert_eq!(link.full_short_url, url);

        assert_eq!(
            h.cache.get(&goto_key(&url)).await.unwrap().as_deref(),
            Some("https://example.com/expiring")
        );
        assert!(h.cache.get(&null_goto_key(&url)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn lifecycle_changes_invalidate_the_cache() {
        let h = harness();
        let link = h
            .service
            .create_link(request("g1", "https://example.com/a"))
            .await
            .unwrap();
        let url = &link.full_short_url;
        assert!(h.cache.get(&goto_key(url)).await.unwrap().is_some());

        assert!(!h.service.set_disabled("g2", url, true).await.unwrap());
        assert!(h.service.set_disabled("g1", url, true).await.unwrap());
        assert!(h.cache.get(&goto_key(url)).await.unwrap().is_none());

        h.cache
            .set(&null_goto_key(url), "-", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(h.service.set_disabled("g1", url, false).await.unwrap());
        assert!(h.cache.get(&null_goto_key(url)).await.unwrap().is_none());

        assert!(h.service.soft_delete("g1", url).await.unwrap());
        let found = h.service.lookup(&link.short_code).await.unwrap().unwrap();
        assert!(found.deleted);
    }

    #[tokio::test]
    async fn rebuild_filter_loads_every_stored_code() {
        let h = harness();
        let code = ShortCode::new_unchecked("manual");
        occupy(&h.store, "g-admin", &code, "https://manual.example").await;
        h.service
            .create_link(request("g1", "https://example.com/a"))
            .await
            .unwrap();
        assert!(!h.filter.might_contain("manual").await.unwrap());

        assert_eq!(h.service.rebuild_filter().await.unwrap(), 2);
        assert!(h.filter.might_contain("manual").await.unwrap());
    }
}
