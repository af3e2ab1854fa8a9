//! Per-address balances and row listings, each tagged with the chain tip it
//! was computed at.
//!
//! Recomputing an entry is single-flight: the first caller takes the update
//! lock for the address, later callers wait for it to finish and then check
//! the cache again.

use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

use chaindex_storage::{AddressBalance, AddressRow};

/// Chain tip an entry is valid for.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheTip {
    pub height: i64,
    pub hash: String,
}

#[derive(Default)]
struct Entry {
    balance: Option<(AddressBalance, CacheTip)>,
    rows: Option<(Vec<AddressRow>, CacheTip)>,
}

pub struct AddressCache {
    entries: Mutex<HashMap<String, Entry>>,
    capacity: usize,
    updating: Mutex<HashSet<String>>,
    finished: Condvar,
}

pub enum LockOutcome<'a> {
    /// The caller owns the update for this address until the guard drops.
    Acquired(UpdateGuard<'a>),
    /// Another caller is updating; wait, then look in the cache again.
    Busy(Waiter<'a>),
}

pub struct UpdateGuard<'a> {
    cache: &'a AddressCache,
    address: String,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.cache.lock_updating().remove(&self.address);
        self.cache.finished.notify_all();
    }
}

pub struct Waiter<'a> {
    cache: &'a AddressCache,
    address: String,
}

impl Waiter<'_> {
    /// Blocks until the in-flight update for the address finishes.
    pub fn wait(self) {
        let mut updating = self.cache.lock_updating();
        while updating.contains(&self.address) {
            updating = self
                .cache
                .finished
                .wait(updating)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl AddressCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            updating: Mutex::new(HashSet::new()),
            finished: Condvar::new(),
        }
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_updating(&self) -> MutexGuard<'_, HashSet<String>> {
        self.updating.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn balance(&self, address: &str) -> Option<(AddressBalance, CacheTip)> {
        self.lock_entries().get(address)?.balance.clone()
    }

    pub fn rows(&self, address: &str) -> Option<(Vec<AddressRow>, CacheTip)> {
        self.lock_entries().get(address)?.rows.clone()
    }

    pub fn store_balance(&self, address: &str, balance: &AddressBalance, tip: CacheTip) {
        let mut entries = self.lock_entries();
        self.make_room(&mut entries, address);
        entries.entry(address.to_string()).or_default().balance = Some((balance.clone(), tip));
    }

    pub fn store_rows(&self, address: &str, rows: &[AddressRow], tip: CacheTip) {
        let mut entries = self.lock_entries();
        self.make_room(&mut entries, address);
        entries.entry(address.to_string()).or_default().rows = Some((rows.to_vec(), tip));
    }

    fn make_room(&self, entries: &mut HashMap<String, Entry>, address: &str) {
        if entries.len() < self.capacity || entries.contains_key(address) {
            return;
        }
        let victim = entries.keys().next().cloned();
        if let Some(victim) = victim {
            entries.remove(&victim);
        }
    }

    /// Evicts the given addresses, or everything when the slice is empty.
    pub fn clear<S: AsRef<str>>(&self, addresses: &[S]) -> usize {
        if addresses.is_empty() {
            return self.clear_all();
        }
        let mut entries = self.lock_entries();
        addresses
            .iter()
            .filter(|address| entries.remove(address.as_ref()).is_some())
            .count()
    }

    pub fn clear_all(&self) -> usize {
        let mut entries = self.lock_entries();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn try_lock_update(&self, address: &str) -> LockOutcome<'_> {
        let mut updating = self.lock_updating();
        if updating.insert(address.to_string()) {
            LockOutcome::Acquired(UpdateGuard {
                cache: self,
                address: address.to_string(),
            })
        } else {
            LockOutcome::Busy(Waiter {
                cache: self,
                address: address.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn tip(height: i64) -> CacheTip {
        CacheTip {
            height,
            hash: format!("h{height}"),
        }
    }

    #[test]
    fn entries_carry_their_tip() {
        let cache = AddressCache::new(8);
        assert!(cache.balance("a").is_none());
        let balance = AddressBalance {
            address: "a".into(),
            num_unspent: 1,
            total_unspent: 50,
            ..AddressBalance::default()
        };
        cache.store_balance("a", &balance, tip(3));
        let (cached, at) = cache.balance("a").expect("cached");
        assert_eq!(cached.total_unspent, 50);
        assert_eq!(at, tip(3));
        assert!(cache.rows("a").is_none());

        cache.store_rows("b", &[], tip(3));
        assert_eq!(cache.clear(&["a"]), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.clear::<&str>(&[]), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn capacity_is_enforced() {
        let cache = AddressCache::new(2);
        for name in ["a", "b", "c"] {
            cache.store_rows(name, &[], tip(1));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.rows("c").is_some());
    }

    #[test]
    fn only_one_updater_per_address() {
        let cache = Arc::new(AddressCache::new(8));
        let recomputes = Arc::new(AtomicUsize::new(0));

        let guard = match cache.try_lock_update("hot") {
            LockOutcome::Acquired(guard) => guard,
            LockOutcome::Busy(_) => panic!("first caller must acquire"),
        };
        assert!(matches!(cache.try_lock_update("cold"), LockOutcome::Acquired(_)));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let recomputes = Arc::clone(&recomputes);
            handles.push(thread::spawn(move || loop {
                if cache.rows("hot").is_some() {
                    return;
                }
                match cache.try_lock_update("hot") {
                    LockOutcome::Acquired(_guard) => {
                        recomputes.fetch_add(1, Ordering::SeqCst);
                        cache.store_rows("hot", &[], tip(1));
                        return;
                    }
                    LockOutcome::Busy(waiter) => waiter.wait(),
                }
            }));
        }

        thread::sleep(Duration::from_millis(50));
        cache.store_rows("hot", &[], tip(1));
        drop(guard);
        for handle in handles {
            handle.join().expect("join");
        }
        assert_eq!(recomputes.load(Ordering::SeqCst), 0);
    }
}
