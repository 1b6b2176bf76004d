use thiserror::Error;

/// What a redirect client gets to see.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Unknown, deleted, or never issued.
    #[error("short link not found")]
    NotFound,
    /// Exists but is disabled or expired.
    #[error("short link is not available")]
    Forbidden,
    /// Every backend failed and there is no safe answer.
    #[error("internal error: {0}")]
    Internal(String),
}
