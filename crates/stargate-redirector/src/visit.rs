use crate::user_agent::{DeviceInfo, UNKNOWN};
use jiff::Timestamp;
use md5::{Digest, Md5};
use stargate_core::{FirstVisit, FullShortUrl, StatsEvent};

/// What the transport layer knows about the client of one redirect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisitContext {
    /// A stable visitor identifier, e.g. from a cookie.
    pub user: Option<String>,
    pub ip: String,
    pub user_agent: String,
    pub network: Option<String>,
    /// `province,city[,adcode]` or a JSON object; empty when unknown.
    pub locale: String,
}

impl VisitContext {
    /// The caller-supplied user, or the MD5 hex of `ip + user_agent`.
    pub fn visitor_id(&self) -> String {
        if let Some(user) = self.user.as_deref().filter(|user| !user.is_empty()) {
            return user.to_string();
        }
        let ip = if self.ip.is_empty() { "unknown" } else { &self.ip };
        let ua = if self.user_agent.is_empty() {
            "unknown"
        } else {
            &self.user_agent
        };

        let mut hasher = Md5::new();
        hasher.update(ip.as_bytes());
        hasher.update(ua.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    /// Builds the stats event for a visit to `full_short_url` in `gid`.
    ///
    /// First-visit flags start cleared; the aggregator settles them against
    /// the visitor sets.
    pub fn to_event(&self, full_short_url: FullShortUrl, gid: String, at: Timestamp) -> StatsEvent {
        let device = DeviceInfo::parse(&self.user_agent);
        StatsEvent {
            full_short_url,
            gid,
            visitor_id: self.visitor_id(),
            first_visit: FirstVisit::default(),
            ip: self.ip.clone(),
            browser: device.browser,
            os: device.os,
            device: device.device,
            network: self
                .network
                .clone()
                .filter(|network| !network.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string()),
            locale: self.locale.clone(),
            event_time: at,
        }
    }
}
