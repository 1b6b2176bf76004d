use crate::error::Error;

/// Source of globally unique, roughly time-ordered 63-bit identifiers.
pub trait IdGenerator: Send + Sync + 'static {
    fn next_id(&self) -> Result<i64, Error>;
}
