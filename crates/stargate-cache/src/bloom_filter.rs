//! In-process Bloom filter over issued short codes.

use async_trait::async_trait;
use bloomfilter::Bloom;
use parking_lot::RwLock;
use stargate_core::error::CacheError;
use stargate_core::filter::{ExistenceFilter, Result};
use tracing::debug;
use typed_builder::TypedBuilder;

/// Sizing for a Bloom filter.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct BloomFilterConfig {
    /// Expected number of items to be inserted into the filter.
    ///
    /// Setting this too low will increase the false positive rate.
    #[builder(default = 1_000_000)]
    pub expected_items: usize,

    /// Desired false positive rate as a probability between 0.0 and 1.0.
    #[builder(default = 0.001)]
    pub false_positive_rate: f64,
}

impl Default for BloomFilterConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Capacity for a rebuild over `count` keys, with headroom for the codes
/// issued until the next rebuild.
fn calculate_capacity(count: usize) -> usize {
    let reserve = if count < 5_000 {
        count / 2
    } else if count < 100_000 {
        count / 5
    } else {
        (count / 10).min(1_000_000)
    };
    count + reserve.max(1_000)
}

/// A Bloom filter local to this process.
///
/// Suitable when a single node issues codes. A code inserted by another node
/// is simply unknown here, which the link service already tolerates: the
/// storage insert reports the conflict and the code is salted.
pub struct BloomExistenceFilter {
    bloom: RwLock<Bloom<str>>,
    config: BloomFilterConfig,
}

fn new_bloom(items: usize, fp_rate: f64) -> Result<Bloom<str>> {
    Bloom::new_for_fp_rate(items.max(1), fp_rate)
        .map_err(|e| CacheError::Initialization(format!("failed to create bloom filter: {e}")))
}

impl BloomExistenceFilter {
    pub fn new(config: BloomFilterConfig) -> Result<Self> {
        let bloom = new_bloom(config.expected_items, config.false_positive_rate)?;
        Ok(Self {
            bloom: RwLock::new(bloom),
            config,
        })
    }
}

#[async_trait]
impl ExistenceFilter for BloomExistenceFilter {
    async fn might_contain(&self, key: &str) -> Result<bool> {
        Ok(self.bloom.read().check(key))
    }

    async fn insert(&self, key: &str) -> Result<()> {
        self.bloom.write().set(key);
        Ok(())
    }

    /// Builds a fresh filter outside the lock and swaps it in, so readers
    /// never observe an empty filter.
    async fn rebuild(&self, keys: &[String]) -> Result<()> {
        let capacity = calculate_capacity(keys.len()).max(self.config.expected_items);
        let mut fresh = new_bloom(capacity, self.config.false_positive_rate)?;
        for key in keys {
            fresh.set(key.as_str());
        }
        *self.bloom.write() = fresh;
        debug!(keys = keys.len(), capacity, "bloom filter rebuilt");
        Ok(())
    }
}
