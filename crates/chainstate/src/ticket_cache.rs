//! Ticket hash to `tickets` row id, for resolving the ticket a vote or
//! revocation spends without scanning the table.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chaindex_storage::{stake, Connection, StoreError};

#[derive(Default)]
pub struct TicketIdCache {
    inner: Mutex<HashMap<String, i64>>,
}

impl TicketIdCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the contents with every unspent main-chain ticket.
    pub fn load_unspent(&self, conn: &Connection) -> Result<usize, StoreError> {
        let tickets = stake::unspent_tickets(conn)?;
        let mut map = self.lock();
        map.clear();
        map.reserve(tickets.len());
        for (hash, id, _) in tickets {
            map.insert(hash, id);
        }
        Ok(map.len())
    }

    /// Row id for `hash`, from the cache or the store. With `evict`, a cache
    /// hit is removed.
    pub fn lookup(&self, conn: &Connection, hash: &str, evict: bool) -> Result<Option<i64>, StoreError> {
        {
            let mut map = self.lock();
            let hit = if evict { map.remove(hash) } else { map.get(hash).copied() };
            if hit.is_some() {
                return Ok(hit);
            }
        }
        Ok(stake::ticket_by_hash(conn, hash)?.map(|status| status.id))
    }

    pub fn set(&self, hash: &str, id: i64) {
        self.lock().insert(hash.to_string(), id);
    }

    pub fn evict(&self, hash: &str) -> Option<i64> {
        self.lock().remove(hash)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaindex_storage::{schema, InsertMode, PoolStatus, SpendType, TicketRow};

    fn conn_with_ticket() -> (Connection, i64) {
        let conn = Connection::open_in_memory().expect("open");
        schema::create_tables(&conn).expect("tables");
        schema::create_indexes(&conn).expect("indexes");
        let id = stake::insert_ticket(
            &conn,
            &TicketRow {
                tx_hash: "tk".into(),
                block_hash: "b1".into(),
                block_height: 1,
                purchase_tx_db_id: 1,
                stakesubmission_address: "Ss".into(),
                is_multisig: false,
                is_split: false,
                num_inputs: 1,
                price: 1.0,
                fee: 0.0,
                spend_type: SpendType::Unspent,
                pool_status: PoolStatus::Live,
                is_mainchain: true,
            },
            InsertMode::Skip,
        )
        .expect("ticket");
        (conn, id)
    }

    #[test]
    fn preload_and_fallback() {
        let (conn, id) = conn_with_ticket();
        let cache = TicketIdCache::new();
        assert_eq!(cache.load_unspent(&conn).expect("load"), 1);
        assert_eq!(cache.lookup(&conn, "tk", true).expect("hit"), Some(id));
        assert!(cache.is_empty());
        // Falls back to the table once evicted.
        assert_eq!(cache.lookup(&conn, "tk", false).expect("fallback"), Some(id));
        assert_eq!(cache.lookup(&conn, "other", false).expect("miss"), None);

        cache.set("x", 5);
        assert_eq!(cache.evict("x"), Some(5));
    }
}
