use crate::error::{CoreError, Result};
use crate::shortcode::{FullShortUrl, ShortCode};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Positive cache lifetime of a permanent link.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a link stays resolvable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidDate {
    /// Never expires.
    Permanent,
    /// Expires at the given instant.
    Until(Timestamp),
}

impl ValidDate {
    const PERMANENT: u8 = 0;
    const CUSTOM: u8 = 1;

    /// Rebuilds a validity window from its persisted `(valid_date_type,
    /// valid_date)` pair.
    pub fn from_parts(valid_type: u8, valid_until: Option<Timestamp>) -> Result<Self> {
        match (valid_type, valid_until) {
            (Self::PERMANENT, _) => Ok(Self::Permanent),
            (Self::CUSTOM, Some(until)) => Ok(Self::Until(until)),
            (Self::CUSTOM, None) => Err(CoreError::InvalidValidity(
                "custom validity without an expiry".to_string(),
            )),
            (other, _) => Err(CoreError::InvalidValidity(format!(
                "unknown validity type {other}"
            ))),
        }
    }

    pub fn type_code(&self) -> u8 {
        match self {
            Self::Permanent => Self::PERMANENT,
            Self::Until(_) => Self::CUSTOM,
        }
    }

    pub fn until(&self) -> Option<Timestamp> {
        match self {
            Self::Permanent => None,
            Self::Until(until) => Some(*until),
        }
    }

    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        matches!(self, Self::Until(until) if *until <= now)
    }

    /// How long a positive cache entry may live.
    ///
    /// Permanent links use `default`. Links with an expiry never outlive it
    /// in the cache, and never get less than one second.
    pub fn cache_ttl(&self, now: Timestamp, default: Duration) -> Duration {
        match self {
            Self::Permanent => default,
            Self::Until(until) => {
                let remaining = until.duration_since(now).as_secs();
                Duration::from_secs(remaining.max(1) as u64)
            }
        }
    }
}

/// The canonical short link, stored in the shard selected by `gid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub id: i64,
    pub gid: String,
    pub domain: String,
    pub short_code: ShortCode,
    pub full_short_url: FullShortUrl,
    pub origin_url: String,
    pub favicon: Option<String>,
    pub description: Option<String>,
    /// Soft-disabled, i.e. moved to the recycle bin.
    pub disabled: bool,
    pub deleted: bool,
    pub deleted_at: Option<Timestamp>,
    pub valid_date: ValidDate,
    pub total_pv: u64,
    pub total_uv: u64,
    pub total_uip: u64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Outcome of the validity checks a resolver runs before redirecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Live,
    Deleted,
    Disabled,
    Expired,
}

impl LinkRecord {
    /// Checks, in order, the delete flag, the disable flag and the expiry.
    pub fn availability(&self, now: Timestamp) -> Availability {
        if self.deleted {
            Availability::Deleted
        } else if self.disabled {
            Availability::Disabled
        } else if self.valid_date.is_expired_at(now) {
            Availability::Expired
        } else {
            Availability::Live
        }
    }

    /// Builds the goto index row that points at this link's shard.
    pub fn goto(&self, id: i64) -> GotoRecord {
        GotoRecord {
            id,
            full_short_url: self.full_short_url.clone(),
            gid: self.gid.clone(),
        }
    }
}

/// `full_short_url -> gid` index row, stored in the shard selected by
/// `full_short_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GotoRecord {
    pub id: i64,
    pub full_short_url: FullShortUrl,
    pub gid: String,
}
