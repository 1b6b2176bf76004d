//! Click statistics: the queued event, the typed aggregate rows it turns
//! into, and the traits the ingestion pipeline is built from.

use crate::error::{CacheError, QueueError, StorageError};
use crate::shortcode::FullShortUrl;
use async_trait::async_trait;
use jiff::civil::Date;
use jiff::tz::TimeZone;
use jiff::Timestamp;
use std::collections::HashMap;

pub const FIELD_FULL_SHORT_URL: &str = "full_short_url";
pub const FIELD_GID: &str = "gid";
pub const FIELD_USER: &str = "user";
pub const FIELD_UV_FIRST: &str = "uv_first_flag";
pub const FIELD_UIP_FIRST: &str = "uip_first_flag";
pub const FIELD_IP: &str = "ip";
pub const FIELD_BROWSER: &str = "browser";
pub const FIELD_OS: &str = "os";
pub const FIELD_DEVICE: &str = "device";
pub const FIELD_NETWORK: &str = "network";
pub const FIELD_LOCALE: &str = "locale";
pub const FIELD_CURRENT_DATE: &str = "current_date";

/// The calendar day statistics are bucketed into. Days are UTC.
pub fn stats_date(at: Timestamp) -> Date {
    at.to_zoned(TimeZone::UTC).date()
}

/// First-visit flags of a single hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirstVisit {
    pub by_visitor: bool,
    pub by_ip: bool,
}

/// One resolution of a short link, queued for aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatsEvent {
    pub full_short_url: FullShortUrl,
    pub gid: String,
    pub visitor_id: String,
    pub first_visit: FirstVisit,
    pub ip: String,
    pub browser: String,
    pub os: String,
    pub device: String,
    pub network: String,
    pub locale: String,
    pub event_time: Timestamp,
}

impl StatsEvent {
    /// Flattens the event into stream fields.
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        vec![
            (FIELD_FULL_SHORT_URL, self.full_short_url.to_string()),
            (FIELD_GID, self.gid.clone()),
            (FIELD_USER, self.visitor_id.clone()),
            (FIELD_UV_FIRST, self.first_visit.by_visitor.to_string()),
            (FIELD_UIP_FIRST, self.first_visit.by_ip.to_string()),
            (FIELD_IP, self.ip.clone()),
            (FIELD_BROWSER, self.browser.clone()),
            (FIELD_OS, self.os.clone()),
            (FIELD_DEVICE, self.device.clone()),
            (FIELD_NETWORK, self.network.clone()),
            (FIELD_LOCALE, self.locale.clone()),
            (FIELD_CURRENT_DATE, self.event_time.to_string()),
        ]
    }

    /// Rebuilds an event from stream fields.
    ///
    /// `full_short_url` and `gid` are required. Missing optional fields
    /// decode as empty strings or `false`; a missing date decodes as now.
    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self, QueueError> {
        let required = |name: &str| {
            fields
                .get(name)
                .filter(|value| !value.is_empty())
                .cloned()
                .ok_or_else(|| QueueError::Decode(format!("missing field '{name}'")))
        };
        let optional = |name: &str| fields.get(name).cloned().unwrap_or_default();
        let flag = |name: &str| fields.get(name).is_some_and(|v| v == "true" || v == "1");

        let event_time = match fields.get(FIELD_CURRENT_DATE) {
            Some(raw) => raw.parse::<Timestamp>().map_err(|e| {
                QueueError::Decode(format!("invalid '{FIELD_CURRENT_DATE}' value '{raw}': {e}"))
            })?,
            None => Timestamp::now(),
        };

        Ok(Self {
            full_short_url: FullShortUrl::from_raw(required(FIELD_FULL_SHORT_URL)?),
            gid: required(FIELD_GID)?,
            visitor_id: optional(FIELD_USER),
            first_visit: FirstVisit {
                by_visitor: flag(FIELD_UV_FIRST),
                by_ip: flag(FIELD_UIP_FIRST),
            },
            ip: optional(FIELD_IP),
            browser: optional(FIELD_BROWSER),
            os: optional(FIELD_OS),
            device: optional(FIELD_DEVICE),
            network: optional(FIELD_NETWORK),
            locale: optional(FIELD_LOCALE),
            event_time,
        })
    }

    pub fn date(&self) -> Date {
        stats_date(self.event_time)
    }

    /// The per-dimension rows this event contributes to. Empty dimension
    /// values are skipped.
    pub fn dimension_rows(&self) -> Vec<DimensionRow> {
        let mut dimensions = Vec::with_capacity(5);
        if let Some(locale) = Locale::parse(&self.locale) {
            dimensions.push(Dimension::Locale(locale));
        }
        for (value, wrap) in [
            (&self.browser, Dimension::Browser as fn(String) -> Dimension),
            (&self.os, Dimension::Os),
            (&self.device, Dimension::Device),
            (&self.network, Dimension::Network),
        ] {
            if !value.is_empty() {
                dimensions.push(wrap(value.clone()));
            }
        }

        let date = self.date();
        dimensions
            .into_iter()
            .map(|dimension| DimensionRow {
                full_short_url: self.full_short_url.clone(),
                date,
                dimension,
            })
            .collect()
    }
}

/// Region a visit came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locale {
    pub province: String,
    pub city: String,
    pub adcode: String,
}

impl Locale {
    /// Parses either a JSON object with `province`, `city` and `adcode`
    /// keys or a `province,city[,adcode]` string. A single token serves as
    /// both province and city. Returns `None` for an empty locale.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }

        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(raw)
        {
            let field = |name: &str| {
                map.get(name)
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            return Some(Self {
                province: field("province"),
                city: field("city"),
                adcode: field("adcode"),
            });
        }

        let mut parts = raw.split(',').map(str::trim);
        let province = parts.next().unwrap_or_default().to_string();
        let city = parts.next().map(str::to_string);
        let adcode = parts.next().unwrap_or_default().to_string();
        Some(Self {
            city: city.unwrap_or_else(|| province.clone()),
            province,
            adcode,
        })
    }

    /// Renders the locale in the form [`Locale::parse`] reads back. A city
    /// equal to its province, or an empty one, collapses to a single token.
    pub fn formatted(&self) -> String {
        if !self.adcode.is_empty() {
            return format!("{},{},{}", self.province, self.city, self.adcode);
        }
        if self.city.is_empty() || self.city == self.province {
            return if self.city.is_empty() {
                self.province.clone()
            } else {
                self.city.clone()
            };
        }
        format!("{},{}", self.province, self.city)
    }
}

/// A breakdown a daily counter is kept for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dimension {
    Locale(Locale),
    Browser(String),
    Os(String),
    Device(String),
    Network(String),
}

impl Dimension {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Locale(_) => "locale",
            Self::Browser(_) => "browser",
            Self::Os(_) => "os",
            Self::Device(_) => "device",
            Self::Network(_) => "network",
        }
    }
}

/// A `(link, date, dimension value)` counter row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DimensionRow {
    pub full_short_url: FullShortUrl,
    pub date: Date,
    pub dimension: Dimension,
}

/// Aggregation writes performed by the stats consumer.
///
/// Every counter write is an atomic upsert: concurrent consumers handling
/// events for the same row never lose an increment.
#[async_trait]
pub trait StatsSink: Send + Sync + 'static {
    /// Adds one page view to the link and one visitor / IP where flagged.
    ///
    /// Returns `false` if no live link matched.
    async fn increment_link_totals(
        &self,
        gid: &str,
        full_short_url: &FullShortUrl,
        first_visit: FirstVisit,
    ) -> Result<bool, StorageError>;

    /// Bumps the `(link, date)` rollup.
    async fn upsert_today(
        &self,
        full_short_url: &FullShortUrl,
        date: Date,
        first_visit: FirstVisit,
    ) -> Result<(), StorageError>;

    /// Inserts the row with count 1 or increments the existing one.
    async fn upsert_dimension(&self, row: &DimensionRow) -> Result<(), StorageError>;

    /// Appends the raw event to the access log.
    async fn append_access_log(&self, event: &StatsEvent) -> Result<(), StorageError>;
}

/// Remembers which visitors and IPs have already seen a link.
#[async_trait]
pub trait VisitorTracker: Send + Sync + 'static {
    /// Returns `true` if this is the visitor's first recorded visit.
    async fn record_visitor(
        &self,
        full_short_url: &FullShortUrl,
        visitor_id: &str,
    ) -> Result<bool, CacheError>;

    /// Returns `true` if this is the IP's first recorded visit.
    async fn record_ip(&self, full_short_url: &FullShortUrl, ip: &str) -> Result<bool, CacheError>;
}

/// Hands events to the ingestion pipeline.
///
/// `submit` never blocks and never fails the caller: delivery problems are
/// logged and the event is dropped.
pub trait StatsSubmitter: Send + Sync + 'static {
    fn submit(&self, event: StatsEvent);
}
