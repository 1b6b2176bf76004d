//! Sharded link storage.
//!
//! Logical tables are split into `N` physical partitions named with a
//! numeric suffix (`t_link_0 .. t_link_{N-1}`). [`ShardRouter`] picks the
//! partition; the repositories here never issue a query without going
//! through it.

pub mod memory;
pub mod mysql;
pub mod mysql_stats;
pub mod pool;
pub mod schema;
pub mod sharding;

pub use memory::{DailyCounters, InMemoryLinkStore};
pub use mysql::MySqlLinkRepository;
pub use mysql_stats::MySqlStatsSink;
pub use pool::PoolSettings;
pub use sharding::ShardRouter;
pub use stargate_core::error::StorageError;
pub use stargate_core::repository::{LinkRepository, Result};
