//! Core types and traits for the Stargate link platform.
//!
//! This crate holds the domain model shared by the resolver, the shortener
//! and the stats pipeline, together with the seam traits every backend
//! implements.

pub mod cache;
pub mod error;
pub mod filter;
pub mod geo;
pub mod link;
pub mod queue;
pub mod repository;
pub mod shortcode;
pub mod stats;

pub use cache::CacheStore;
pub use error::{CacheError, CoreError, QueueError, StorageError};
pub use filter::ExistenceFilter;
pub use geo::IpLocator;
pub use link::{Availability, GotoRecord, LinkRecord, ValidDate};
pub use queue::{ClaimedBatch, QueueBroker, StreamMessage, CLAIM_START};
pub use repository::LinkRepository;
pub use shortcode::{FullShortUrl, ShortCode};
pub use stats::{
    Dimension, DimensionRow, FirstVisit, Locale, StatsEvent, StatsSink, StatsSubmitter,
    VisitorTracker,
};
