use crate::Result;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::ImageExt;
use testcontainers::{ContainerAsync, GenericImage};
use typed_builder::TypedBuilder;

#[derive(TypedBuilder)]
pub struct MysqlConfig {
    #[builder(default = "stargate".to_string())]
    database: String,
    #[builder(default = "stargate".to_string())]
    username: String,
    #[builder(default = "stargate".to_string())]
    password: String,
    #[builder(default = 5)]
    max_connections: u32,
    /// How many times [`MySqlServer::pool`] retries while mysqld finishes
    /// its init scripts.
    #[builder(default = 30)]
    connect_attempts: u32,
}

/// A disposable MySQL 8.4 server holding one empty database.
pub struct MySqlServer {
    container: ContainerAsync<GenericImage>,
    config: MysqlConfig,
}

impl MySqlServer {
    pub async fn new(config: MysqlConfig) -> Result<Self> {
        let container = GenericImage::new("mysql", "8.4")
            .with_exposed_port(3306_u16.tcp())
            .with_wait_for(WaitFor::message_on_stderr("ready for connections"))
            .with_env_var("MYSQL_DATABASE", config.database.as_str())
            .with_env_var("MYSQL_USER", config.username.as_str())
            .with_env_var("MYSQL_PASSWORD", config.password.as_str())
            .with_env_var("MYSQL_ROOT_PASSWORD", "root")
            .start()
            .await?;

        Ok(Self { container, config })
    }

    pub async fn database_url(&self) -> Result<String> {
        let host = self.container.get_host().await?.to_string();
        let port = self.container.get_host_port_ipv4(3306).await?;
        Ok(format!(
            "mysql://{}:{}@{}:{}/{}",
            self.config.username, self.config.password, host, port, self.config.database
        ))
    }

    /// Connects a pool, retrying until the server accepts logins.
    ///
    /// The first "ready for connections" line is printed by the temporary
    /// init server, so the real listener can lag behind it by a few seconds.
    pub async fn pool(&self) -> Result<MySqlPool> {
        let url = self.database_url().await?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match MySqlPoolOptions::new()
                .max_connections(self.config.max_connections)
                .connect(&url)
                .await
            {
                Ok(pool) => return Ok(pool),
                Err(err) if attempt >= self.config.connect_attempts => return Err(err.into()),
                Err(_) => tokio::time::sleep(Duration::from_millis(500)).await,
            }
        }
    }
}
