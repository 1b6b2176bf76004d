use stargate_core::{CacheError, CoreError, StorageError};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ShortenerError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid valid date: {0}")]
    InvalidValidDate(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(String),
    #[error("no free short code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },
    #[error("link already exists: {0}")]
    Conflict(String),
    #[error("storage error: {0}")]
    Storage(StorageError),
    #[error("existence filter error: {0}")]
    Filter(CacheError),
    #[error("id generation failed: {0}")]
    Id(#[from] stargate_snowflake::Error),
}

impl From<CoreError> for ShortenerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidShortCode(message) => Self::InvalidShortCode(message),
            CoreError::InvalidValidity(message) => Self::InvalidValidDate(message),
        }
    }
}

impl From<StorageError> for ShortenerError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Conflict(url) => Self::Conflict(url),
            other => Self::Storage(other),
        }
    }
}
