use stargate_core::error::StorageError;

pub const LINK_TABLE: &str = "t_link";
pub const GOTO_TABLE: &str = "t_link_goto";

/// Maps a shard key to one of `shard_count` physical partitions.
///
/// Routing is pure: the same key and shard count always give the same
/// partition. Keys are hashed with CRC32 (IEEE).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: usize,
}

impl ShardRouter {
    pub fn new(shard_count: usize) -> Result<Self, StorageError> {
        if shard_count == 0 {
            return Err(StorageError::InvalidData(
                "shard count must be at least 1".to_string(),
            ));
        }
        Ok(Self { shard_count })
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn route_str(&self, key: &str) -> usize {
        crc32fast::hash(key.as_bytes()) as usize % self.shard_count
    }

    /// Physical name of `logical` in partition `shard`.
    pub fn table_name(logical: &str, shard: usize) -> String {
        format!("{logical}_{shard}")
    }

    /// The link partition for a group.
    pub fn link_table(&self, gid: &str) -> String {
        Self::table_name(LINK_TABLE, self.route_str(gid))
    }

    /// The goto partition for a full short URL.
    pub fn goto_table(&self, full_short_url: &str) -> String {
        Self::table_name(GOTO_TABLE, self.route_str(full_short_url))
    }

    /// Every physical link partition, for fan-out scans.
    pub fn all_link_tables(&self) -> impl Iterator<Item = String> {
        (0..self.shard_count).map(|shard| Self::table_name(LINK_TABLE, shard))
    }
}
