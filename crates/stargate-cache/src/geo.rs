use async_trait::async_trait;
use maxminddb::Reader;
use stargate_core::cache::CacheStore;
use stargate_core::error::CacheError;
use stargate_core::geo::IpLocator;
use stargate_core::stats::Locale;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// How long a resolved location is remembered per IP.
pub const LOCATION_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub fn location_key(ip: &str) -> String {
    format!("ip:location:{ip}")
}

/// Looks addresses up in a local GeoLite2-City database.
///
/// The country ISO code stands in for the province and the English city
/// name for the city.
pub struct MaxMindLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl MaxMindLocator {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| {
            CacheError::Initialization(format!("geoip database {}: {e}", path.display()))
        })?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }
}

#[async_trait]
impl IpLocator for MaxMindLocator {
    async fn locate(&self, ip: &str) -> Option<Locale> {
        let ip_addr: IpAddr = ip.parse().ok()?;
        let result = self.reader.lookup(ip_addr).ok()?;
        let city: maxminddb::geoip2::City = result.decode().ok()??;

        let province = city.country.iso_code.map(String::from)?;
        let city_name = city
            .city
            .names
            .english
            .map(|s| s.to_string())
            .unwrap_or_default();
        trace!(ip, province = %province, city = %city_name, "maxmind lookup");

        Some(Locale {
            province,
            city: city_name,
            adcode: String::new(),
        })
    }

    fn name(&self) -> &'static str {
        "MaxMind"
    }
}

/// Remembers successful lookups of another [`IpLocator`] in a
/// [`CacheStore`]. Misses are not cached, so they are retried next visit.
pub struct CachedLocator {
    inner: Arc<dyn IpLocator>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl CachedLocator {
    pub fn new(inner: Arc<dyn IpLocator>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            inner,
            cache,
            ttl: LOCATION_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl IpLocator for CachedLocator {
    async fn locate(&self, ip: &str) -> Option<Locale> {
        if ip.parse::<IpAddr>().is_err() {
            return None;
        }
        let key = location_key(ip);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => {
                if let Some(locale) = Locale::parse(&raw) {
                    return Some(locale);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(ip, error = %e, "location cache read failed"),
        }

        let locale = self.inner.locate(ip).await?;
        if let Err(e) = self.cache.set(&key, &locale.formatted(), self.ttl).await {
            warn!(ip, error = %e, "location cache write failed");
        }
        Some(locale)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
