//! Cache, existence filter, visitor tracking and IP location backends.

pub mod bloom_filter;
pub mod geo;
pub mod moka;
pub mod redis;
pub mod redis_bloom;
pub mod visitor;

pub use bloom_filter::{BloomExistenceFilter, BloomFilterConfig};
pub use geo::{CachedLocator, MaxMindLocator, LOCATION_TTL};
pub use moka::{MokaCacheConfig, MokaCacheStore};
pub use redis::RedisCacheStore;
pub use redis_bloom::{RedisBloomConfig, RedisBloomFilter};
pub use stargate_core::cache::{CacheStore, Result};
pub use stargate_core::error::CacheError;
pub use visitor::{InMemoryVisitorTracker, RedisVisitorTracker, VISITOR_TTL};
