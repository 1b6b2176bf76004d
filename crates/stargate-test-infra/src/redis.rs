use crate::Result;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

/// A standalone Redis 8 server. Streams and bitmaps are built in, so the
/// stats queue and the shared bloom filter both run against it unchanged.
pub struct RedisServer {
    container: ContainerAsync<GenericImage>,
}

impl RedisServer {
    pub async fn new() -> Result<Self> {
        let container = GenericImage::new("redis", "8.6.0")
            .with_exposed_port(6379_u16.tcp())
            .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
            .start()
            .await?;
        Ok(Self { container })
    }

    pub async fn url(&self) -> Result<String> {
        let host = self.container.get_host().await?.to_string();
        let host = match host.as_str() {
            "localhost" => String::from("127.0.0.1"),
            _ => host,
        };
        let port = self.container.get_host_port_ipv4(6379).await?;
        Ok(format!("redis://{host}:{port}"))
    }

    /// Opens a multiplexed connection, answering `PING` before returning.
    pub async fn connection(&self) -> Result<MultiplexedConnection> {
        let client = redis::Client::open(self.url().await?)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = async {
                let mut conn = client.get_multiplexed_async_connection().await?;
                redis::cmd("PING").query_async::<String>(&mut conn).await?;
                Ok::<_, redis::RedisError>(conn)
            }
            .await;
            match result {
                Ok(conn) => return Ok(conn),
                Err(err) if attempt >= 20 => return Err(err.into()),
                Err(_) => tokio::time::sleep(Duration::from_millis(250)).await,
            }
        }
    }
}
