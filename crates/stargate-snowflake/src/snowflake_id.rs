use modular_bitfield::prelude::*;
use std::fmt;

/// A 63-bit identifier. The sign bit is always zero so the value fits a
/// signed 64-bit primary key column.
#[bitfield]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnowflakeId {
    /// 12 bits for the per-millisecond sequence.
    pub sequence: B12,
    /// 10 bits for the node ID (up to 1024 nodes).
    pub node_id: B10,
    /// 41 bits for milliseconds since the custom epoch.
    pub timestamp: B41,
    #[skip]
    __: B1,
}

impl SnowflakeId {
    pub fn as_i64(&self) -> i64 {
        i64::from_le_bytes(self.into_bytes())
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_bytes(value.to_le_bytes())
    }
}

impl fmt::Debug for SnowflakeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeId")
            .field("timestamp", &self.timestamp())
            .field("node_id", &self.node_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}
