use crate::mysql::map_sqlx_error;
use crate::Result;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::MySqlPool;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Connection pool limits for one physical database. All shards of the
/// database share the pool.
#[derive(Debug, Clone, TypedBuilder)]
pub struct PoolSettings {
    #[builder(default = 100)]
    pub max_connections: u32,
    /// Connections kept open while idle.
    #[builder(default = 10)]
    pub min_connections: u32,
    /// Connections older than this are closed and reopened.
    #[builder(default = Duration::from_secs(60 * 60))]
    pub max_lifetime: Duration,
    #[builder(default = Duration::from_secs(5))]
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PoolSettings {
    pub fn options(&self) -> MySqlPoolOptions {
        MySqlPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .max_lifetime(self.max_lifetime)
            .acquire_timeout(self.acquire_timeout)
    }

    pub async fn connect(&self, database_url: &str) -> Result<MySqlPool> {
        self.options()
            .connect(database_url)
            .await
            .map_err(map_sqlx_error)
    }
}
