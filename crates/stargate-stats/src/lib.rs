//! Click statistics ingestion over a durable stream.
//!
//! Resolvers hand events to a [`StatsProducer`], which appends them to the
//! stream without blocking the redirect. One [`StatsConsumer`] per process
//! reads the stream through a shared consumer group and folds every event
//! into the aggregate tables with [`StatsAggregator`]. Delivery is
//! at-least-once: an event whose processing fails stays pending in the
//! group and is claimed again once it has been idle long enough.

pub mod aggregator;
pub mod backoff;
pub mod consumer;
pub mod error;
pub mod memory;
pub mod producer;
pub mod redis;

pub use aggregator::StatsAggregator;
pub use backoff::{Backoff, BackoffPolicy};
pub use consumer::{ConsumerSettings, PollOutcome, StatsConsumer};
pub use error::StatsError;
pub use memory::InMemoryBroker;
pub use producer::StatsProducer;
pub use redis::RedisStreamBroker;

/// Stream every resolver appends click events to.
pub const STATS_STREAM: &str = "short-link:stats:stream";
/// Consumer group shared by all aggregating processes.
pub const STATS_GROUP: &str = "short-link-stats-group";
/// Length brokers trim the stream back to on append. Redis trims
/// approximately, so the stream can briefly run somewhat longer.
pub const DEFAULT_STREAM_MAX_LEN: usize = 100_000;
pub const CONSUMER_PREFIX: &str = "consumer-";

/// A consumer name unique to this process start.
pub fn consumer_name() -> String {
    format!("{CONSUMER_PREFIX}{}", jiff::Timestamp::now().as_nanosecond())
}
