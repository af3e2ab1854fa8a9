//! Funding output data keyed by outpoint, consumed by the input that spends it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chaindex_consensus::Hash256;
use chaindex_storage::UtxoRecord;

type Outputs = HashMap<u32, UtxoRecord>;

#[derive(Default)]
pub struct UtxoCache {
    inner: Mutex<HashMap<Hash256, Outputs>>,
}

impl UtxoCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Hash256, Outputs>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns and removes the entry. An output is spent once on the main
    /// chain, so the data is not needed after this.
    pub fn get(&self, hash: &Hash256, index: u32) -> Option<UtxoRecord> {
        let mut map = self.lock();
        let outputs = map.get_mut(hash)?;
        let record = outputs.remove(&index);
        if outputs.is_empty() {
            map.remove(hash);
        }
        record
    }

    /// Returns the entry without removing it.
    pub fn peek(&self, hash: &Hash256, index: u32) -> Option<UtxoRecord> {
        self.lock().get(hash)?.get(&index).cloned()
    }

    /// Drops every cached output of a transaction. Returns how many went.
    pub fn remove_tx(&self, hash: &Hash256) -> usize {
        self.lock().remove(hash).map_or(0, |outputs| outputs.len())
    }

    pub fn set(&self, hash: Hash256, index: u32, record: UtxoRecord) {
        self.lock().entry(hash).or_default().insert(index, record);
    }

    /// Replaces the contents with a snapshot of unspent outputs.
    pub fn reinit(&self, entries: Vec<(Hash256, u32, UtxoRecord)>) {
        // Most funding transactions have more than one unspent output.
        let mut fresh: HashMap<Hash256, Outputs> = HashMap::with_capacity(entries.len() * 2 / 3);
        for (hash, index, record) in entries {
            fresh.entry(hash).or_default().insert(index, record);
        }
        *self.lock() = fresh;
    }

    /// Number of cached outpoints.
    pub fn len(&self) -> usize {
        self.lock().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64) -> UtxoRecord {
        UtxoRecord {
            vout_id: id,
            value: id * 10,
            addresses: vec![format!("addr{id}")],
            mixed: false,
        }
    }

    #[test]
    fn get_evicts_peek_does_not() {
        let cache = UtxoCache::new();
        cache.set([1; 32], 0, record(1));
        cache.set([1; 32], 1, record(2));
        assert_eq!(cache.len(), 2);

        assert_eq!(cache.peek(&[1; 32], 0), Some(record(1)));
        assert_eq!(cache.get(&[1; 32], 0), Some(record(1)));
        assert_eq!(cache.get(&[1; 32], 0), None);
        assert_eq!(cache.get(&[1; 32], 1), Some(record(2)));
        assert!(cache.is_empty());
    }

    #[test]
    fn remove_tx_drops_all_outputs() {
        let cache = UtxoCache::new();
        cache.set([1; 32], 0, record(1));
        cache.set([1; 32], 2, record(2));
        cache.set([2; 32], 0, record(3));
        assert_eq!(cache.remove_tx(&[1; 32]), 2);
        assert_eq!(cache.remove_tx(&[1; 32]), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn reinit_replaces_contents() {
        let cache = UtxoCache::new();
        cache.set([9; 32], 0, record(9));
        cache.reinit(vec![([1; 32], 0, record(1)), ([1; 32], 3, record(3)), ([2; 32], 0, record(4))]);
        assert_eq!(cache.len(), 3);
        assert!(cache.peek(&[9; 32], 0).is_none());
        assert_eq!(cache.peek(&[1; 32], 3).map(|r| r.vout_id), Some(3));
    }
}
