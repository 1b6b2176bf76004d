use crate::sharding::ShardRouter;
use crate::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use jiff::civil::Date;
use jiff::Timestamp;
use parking_lot::Mutex;
use stargate_core::error::StorageError;
use stargate_core::link::{GotoRecord, LinkRecord};
use stargate_core::repository::LinkRepository;
use stargate_core::shortcode::{FullShortUrl, ShortCode};
use stargate_core::stats::{DimensionRow, FirstVisit, StatsEvent, StatsSink};
use std::sync::atomic::{AtomicUsize, Ordering};

/// The `(link, date)` rollup kept by [`InMemoryLinkStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyCounters {
    pub pv: u64,
    pub uv: u64,
    pub uip: u64,
}

/// An in-memory, partitioned stand-in for the MySQL store.
///
/// Partitions are routed with the same [`ShardRouter`] the MySQL store
/// uses. Reads against link and goto partitions are counted so tests can
/// assert that a lookup never reached storage.
#[derive(Debug)]
pub struct InMemoryLinkStore {
    router: ShardRouter,
    links: Vec<DashMap<FullShortUrl, LinkRecord>>,
    gotos: Vec<DashMap<FullShortUrl, GotoRecord>>,
    today: DashMap<(FullShortUrl, Date), DailyCounters>,
    dimensions: DashMap<DimensionRow, u64>,
    access_log: Mutex<Vec<StatsEvent>>,
    reads: AtomicUsize,
}

impl InMemoryLinkStore {
    pub fn new(router: ShardRouter) -> Self {
        let shards = router.shard_count();
        Self {
            router,
            links: (0..shards).map(|_| DashMap::new()).collect(),
            gotos: (0..shards).map(|_| DashMap::new()).collect(),
            today: DashMap::new(),
            dimensions: DashMap::new(),
            access_log: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
        }
    }

    /// How many link and goto lookups have been served.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn today(&self, full_short_url: &FullShortUrl, date: Date) -> Option<DailyCounters> {
        self.today
            .get(&(full_short_url.clone(), date))
            .map(|entry| *entry)
    }

    pub fn dimension_count(&self, row: &DimensionRow) -> u64 {
        self.dimensions.get(row).map(|entry| *entry).unwrap_or(0)
    }

    pub fn access_log(&self) -> Vec<StatsEvent> {
        self.access_log.lock().clone()
    }

    fn link_shard(&self, gid: &str) -> &DashMap<FullShortUrl, LinkRecord> {
        &self.links[self.router.route_str(gid)]
    }

    fn goto_shard(&self, full_short_url: &FullShortUrl) -> &DashMap<FullShortUrl, GotoRecord> {
        &self.gotos[self.router.route_str(full_short_url.as_str())]
    }

    fn update_live<F>(&self, gid: &str, full_short_url: &FullShortUrl, apply: F) -> bool
    where
        F: FnOnce(&mut LinkRecord),
    {
        match self.link_shard(gid).get_mut(full_short_url) {
            Some(mut link) if link.gid == gid && !link.deleted => {
                apply(&mut *link);
                link.updated_at = Timestamp::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl LinkRepository for InMemoryLinkStore {
    async fn insert(&self, link: &LinkRecord, goto: &GotoRecord) -> Result<()> {
        match self.goto_shard(&goto.full_short_url).entry(goto.full_short_url.clone()) {
            Entry::Occupied(_) => Err(StorageError::Conflict(link.full_short_url.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(goto.clone());
                self.link_shard(&link.gid)
                    .insert(link.full_short_url.clone(), link.clone());
                Ok(())
            }
        }
    }

    async fn find_goto(&self, full_short_url: &FullShortUrl) -> Result<Option<GotoRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .goto_shard(full_short_url)
            .get(full_short_url)
            .map(|entry| entry.clone()))
    }

    async fn find_link(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
    ) -> Result<Option<LinkRecord>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .link_shard(gid)
            .get(full_short_url)
            .filter(|entry| entry.gid == gid)
            .map(|entry| entry.clone()))
    }

    async fn exists(&self, full_short_url: &FullShortUrl) -> Result<bool> {
        Ok(self.goto_shard(full_short_url).contains_key(full_short_url))
    }

    async fn set_disabled(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
        disabled: bool,
    ) -> Result<bool> {
        Ok(self.update_live(gid, full_short_url, |link| link.disabled = disabled))
    }

    async fn soft_delete(&self, gid: &str, full_short_url: &FullShortUrl) -> Result<bool> {
        Ok(self.update_live(gid, full_short_url, |link| {
            link.deleted = true;
            link.deleted_at = Some(Timestamp::now());
        }))
    }

    async fn find_link_unscoped(
        &self,
        full_short_url: &FullShortUrl,
    ) -> Result<Option<LinkRecord>> {
        Ok(self
            .links
            .iter()
            .find_map(|shard| shard.get(full_short_url).map(|entry| entry.clone())))
    }

    async fn all_short_codes(&self) -> Result<Vec<ShortCode>> {
        Ok(self
            .links
            .iter()
            .flat_map(|shard| {
                shard
                    .iter()
                    .map(|entry| entry.short_code.clone())
                    .collect::<Vec<_>>()
            })
            .collect())
    }
}

#[async_trait]
impl StatsSink for InMemoryLinkStore {
    async fn increment_link_totals(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
        first_visit: FirstVisit,
    ) -> Result<bool> {
        Ok(self.update_live(gid, full_short_url, |link| {
            link.total_pv += 1;
            link.total_uv += u64::from(first_visit.by_visitor);
            link.total_uip += u64::from(first_visit.by_ip);
        }))
    }

    async fn upsert_today(
        &self,
        full_short_url: &FullShortUrl,
        date: Date,
        first_visit: FirstVisit,
    ) -> Result<()> {
        let mut counters = self
            .today
            .entry((full_short_url.clone(), date))
            .or_default();
        counters.pv += 1;
        counters.uv += u64::from(first_visit.by_visitor);
        counters.uip += u64::from(first_visit.by_ip);
        Ok(())
    }

    async fn upsert_dimension(&self, row: &DimensionRow) -> Result<()> {
        *self.dimensions.entry(row.clone()).or_insert(0) += 1;
        Ok(())
    }

    async fn append_access_log(&self, event: &StatsEvent) -> Result<()> {
        self.access_log.lock().push(event.clone());
        Ok(())
    }
}
