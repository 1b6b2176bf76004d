use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use stargate_core::{LinkRecord, ValidDate};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkResponse {
    pub short_code: String,
    pub full_short_url: String,
    pub origin_url: String,
    pub gid: String,
    pub valid_date: ValidDate,
    pub enabled: bool,
    pub total_pv: u64,
    pub total_uv: u64,
    pub total_uip: u64,
    pub created_at: Timestamp,
}

impl From<LinkRecord> for LinkResponse {
    fn from(link: LinkRecord) -> Self {
        Self {
            short_code: link.short_code.as_str().to_string(),
            full_short_url: link.full_short_url.as_str().to_string(),
            origin_url: link.origin_url,
            gid: link.gid,
            valid_date: link.valid_date,
            enabled: !link.disabled,
            total_pv: link.total_pv,
            total_uv: link.total_uv,
            total_uip: link.total_uip,
            created_at: link.created_at,
        }
    }
}

/// Body of the enable and disable endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ChangeStatusRequest {
    pub gid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteLinkQuery {
    pub gid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildResponse {
    pub codes: usize,
}
