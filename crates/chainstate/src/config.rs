use std::time::Duration;

use chaindex_storage::InsertMode;

/// Engine knobs.
#[derive(Clone, Debug)]
pub struct IndexerConfig {
    /// Guard inserts against unique-key conflicts. Off only for bulk loads
    /// with the unique indexes dropped.
    pub dup_checks: bool,
    /// Overwrite rows that already exist instead of keeping them.
    pub update_existing: bool,
    /// Mark funding rows spent and link vouts to their spenders while storing.
    pub update_address_spends: bool,
    pub query_timeout: Option<Duration>,
    /// Blocks between sync progress lines.
    pub sync_status_interval: i64,
    pub address_cache_capacity: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            dup_checks: true,
            update_existing: false,
            update_address_spends: true,
            query_timeout: Some(Duration::from_secs(3_600)),
            sync_status_interval: 1_000,
            address_cache_capacity: 10_000,
        }
    }
}

impl IndexerConfig {
    pub fn insert_mode(&self, update_existing: bool) -> InsertMode {
        InsertMode::from_flags(self.dup_checks, self.update_existing || update_existing)
    }
}
