//! Short link resolution.
//!
//! [`Resolver`] turns a short code into its origin URL through a positive
//! cache, a negative cache and finally the sharded store, and hands a click
//! event to the stats pipeline for every successful redirect.

pub mod error;
pub mod resolver;
pub mod user_agent;
pub mod visit;

pub use error::ResolveError;
pub use resolver::{Redirector, Resolver, ResolverSettings};
pub use user_agent::{DeviceInfo, UNKNOWN};
pub use visit::VisitContext;
