//! Short-code derivation and link creation.

pub mod error;
pub mod hash;
pub mod service;

pub use error::ShortenerError;
pub use hash::{hash_to_base62, CODE_LENGTH};
pub use service::{CreateLinkRequest, LinkService, ShortenerSettings};
