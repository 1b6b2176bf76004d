//! A Bloom filter stored as a Redis bitmap, shared by every node.

use crate::redis::map_redis_error;
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use stargate_core::error::CacheError;
use stargate_core::filter::{ExistenceFilter, Result};
use tracing::{debug, trace};
use typed_builder::TypedBuilder;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Redis bitmaps are addressed with 32-bit offsets.
const MAX_BITS: u64 = u32::MAX as u64;
const REBUILD_BATCH: usize = 1_000;

#[derive(Debug, Clone, TypedBuilder)]
pub struct RedisBloomConfig {
    #[builder(default = "short-link:bloom:codes".to_string(), setter(into))]
    pub key: String,
    #[builder(default = 10_000_000)]
    pub expected_items: u64,
    #[builder(default = 0.001)]
    pub false_positive_rate: f64,
}

/// Bit count `m` and hash count `k` for `n` items at false positive rate `p`.
fn optimal_parameters(n: u64, p: f64) -> Result<(u64, u32)> {
    if !(p > 0.0 && p < 1.0) {
        return Err(CacheError::Initialization(format!(
            "false positive rate must be in (0, 1), got {p}"
        )));
    }
    let n = n.max(1) as f64;
    let ln2 = std::f64::consts::LN_2;
    let bits = (-(n * p.ln()) / (ln2 * ln2)).ceil() as u64;
    let bits = bits.clamp(64, MAX_BITS);
    let hashes = ((bits as f64 / n) * ln2).round().max(1.0) as u32;
    Ok((bits, hashes))
}

/// A Bloom filter backed by `SETBIT`/`GETBIT` on one Redis key.
///
/// Bit positions use double hashing over two seeded xxh3 digests. Every
/// node computes the same positions, so a code added by one node is seen
/// by all of them.
#[derive(Debug, Clone)]
pub struct RedisBloomFilter {
    conn: MultiplexedConnection,
    key: String,
    bits: u64,
    hashes: u32,
}

impl RedisBloomFilter {
    pub fn new(conn: MultiplexedConnection, config: RedisBloomConfig) -> Result<Self> {
        let (bits, hashes) = optimal_parameters(config.expected_items, config.false_positive_rate)?;
        debug!(key = %config.key, bits, hashes, "redis bloom filter configured");
        Ok(Self {
            conn,
            key: config.key,
            bits,
            hashes,
        })
    }

    fn positions(&self, item: &str) -> impl Iterator<Item = u64> {
        let h1 = xxh3_64_with_seed(item.as_bytes(), 0);
        let h2 = xxh3_64_with_seed(item.as_bytes(), 0x9E37_79B9_7F4A_7C15) | 1;
        let bits = self.bits;
        (0..u64::from(self.hashes)).map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % bits)
    }

    async fn set_all(&self, key: &str, items: &[String]) -> Result<()> {
        let mut conn = self.conn.clone();
        for chunk in items.chunks(REBUILD_BATCH) {
            let mut pipe = redis::pipe();
            for item in chunk {
                for offset in self.positions(item) {
                    pipe.cmd("SETBIT").arg(key).arg(offset).arg(1).ignore();
                }
            }
            pipe.query_async::<()>(&mut conn)
                .await
                .map_err(|e| map_redis_error("failed to set bloom bits", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ExistenceFilter for RedisBloomFilter {
    async fn might_contain(&self, key: &str) -> Result<bool> {
        let mut pipe = redis::pipe();
        for offset in self.positions(key) {
            pipe.cmd("GETBIT").arg(&self.key).arg(offset);
        }
        let mut conn = self.conn.clone();
        let bits: Vec<u8> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to read bloom bits", e))?;
        let present = bits.iter().all(|bit| *bit == 1);
        trace!(key, present, "redis bloom check");
        Ok(present)
    }

    async fn insert(&self, key: &str) -> Result<()> {
        self.set_all(&self.key, &[key.to_string()]).await
    }

    /// Fills a scratch key and renames it over the live one, so readers see
    /// either the old bitmap or the complete new one.
    async fn rebuild(&self, keys: &[String]) -> Result<()> {
        let mut conn = self.conn.clone();
        let scratch = format!("{}:rebuild", self.key);

        redis::cmd("DEL")
            .arg(&scratch)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to clear bloom scratch key", e))?;

        if keys.is_empty() {
            redis::cmd("DEL")
                .arg(&self.key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| map_redis_error("failed to clear bloom filter", e))?;
            return Ok(());
        }

        self.set_all(&scratch, keys).await?;
        redis::cmd("RENAME")
            .arg(&scratch)
            .arg(&self.key)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to swap bloom filter", e))?;

        debug!(key = %self.key, keys = keys.len(), "redis bloom filter rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_follow_the_standard_formulas() {
        // n = 1M, p = 1% gives m ~ 9.59M bits and k = 7.
        let (bits, hashes) = optimal_parameters(1_000_000, 0.01).unwrap();
        assert!((9_585_000..9_586_000).contains(&bits), "{bits}");
        assert_eq!(hashes, 7);
    }

    #[test]
    fn bit_count_is_capped_at_the_redis_offset_limit() {
        let (bits, _) = optimal_parameters(u64::MAX / 2, 0.0001).unwrap();
        assert_eq!(bits, MAX_BITS);
    }

    #[test]
    fn out_of_range_rate_is_rejected() {
        assert!(optimal_parameters(100, 0.0).is_err());
        assert!(optimal_parameters(100, 1.0).is_err());
    }
}
