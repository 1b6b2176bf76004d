use std::result::Result as StdResult;
use thiserror::Error;

/// Failures while bringing up a disposable backend for a test.
#[derive(Debug, Error)]
pub enum TestInfraError {
    #[error("Container error: {0}")]
    Container(#[from] testcontainers::TestcontainersError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("MySQL error: {0}")]
    MySql(#[from] sqlx::Error),
}

pub type Result<T> = StdResult<T, TestInfraError>;
