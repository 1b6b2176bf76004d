use clap::{Parser, ValueEnum};
use stargate_telemetry::LogFormat;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const LISTEN_ADDR_ENV: &str = "STARGATE_LISTEN_ADDR";
pub const DOMAIN_ENV: &str = "STARGATE_DOMAIN";
pub const NODE_ID_ENV: &str = "STARGATE_NODE_ID";
pub const SHARDS_ENV: &str = "STARGATE_SHARDS";
pub const STORAGE_BACKEND_ENV: &str = "STARGATE_STORAGE_BACKEND";
pub const MYSQL_DSN_ENV: &str = "STARGATE_MYSQL_DSN";
pub const CACHE_BACKEND_ENV: &str = "STARGATE_CACHE_BACKEND";
pub const REDIS_URL_ENV: &str = "STARGATE_REDIS_URL";
pub const LOG_FORMAT_ENV: &str = "STARGATE_LOG_FORMAT";
pub const CONSUMER_NAME_ENV: &str = "STARGATE_CONSUMER_NAME";
pub const GEOIP_DB_ENV: &str = "STARGATE_GEOIP_DB";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    InMemory,
    Mysql,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::Mysql => write!(f, "mysql"),
        }
    }
}

/// Where the link cache, the existence filter, the visitor sets and the
/// stats stream live. `moka` keeps all of them in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheBackendArg {
    Moka,
    Redis,
}

impl Display for CacheBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheBackendArg::Moka => write!(f, "moka"),
            CacheBackendArg::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "stargate-gateway")]
pub struct CLI {
    #[arg(long, env = LISTEN_ADDR_ENV, default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,
    /// Domain short links are issued under.
    #[arg(long, env = DOMAIN_ENV, default_value = "nurl.ink")]
    pub domain: String,
    /// Snowflake node index, unique per running instance.
    #[arg(long, env = NODE_ID_ENV, default_value_t = 0)]
    pub node_id: u16,
    #[arg(long, env = SHARDS_ENV, default_value_t = 16)]
    pub shards: usize,
    #[arg(long, env = STORAGE_BACKEND_ENV, value_enum, default_value_t = StorageBackendArg::InMemory)]
    pub storage: StorageBackendArg,
    #[arg(long, env = MYSQL_DSN_ENV, required_if_eq("storage", "mysql"))]
    pub mysql_dsn: Option<String>,
    #[arg(long, env = CACHE_BACKEND_ENV, value_enum, default_value_t = CacheBackendArg::Moka)]
    pub cache: CacheBackendArg,
    #[arg(long, env = REDIS_URL_ENV, required_if_eq("cache", "redis"))]
    pub redis_url: Option<String>,
    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
    /// Name inside the stats consumer group. Defaults to one unique per start.
    #[arg(long, env = CONSUMER_NAME_ENV)]
    pub consumer_name: Option<String>,
    /// GeoLite2-City database used to fill in visit locales.
    #[arg(long, env = GEOIP_DB_ENV)]
    pub geoip_db: Option<PathBuf>,
}
