//! The best main-chain block, shared between the writer and readers.

use std::sync::{Mutex, PoisonError};

use chaindex_consensus::{hash256_to_hex, Hash256, ZERO_HASH};

use crate::address_cache::CacheTip;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BestBlock {
    /// -1 before any block is stored.
    pub height: i64,
    pub hash: Hash256,
}

impl BestBlock {
    pub const EMPTY: BestBlock = BestBlock {
        height: -1,
        hash: ZERO_HASH,
    };

    pub fn is_empty(&self) -> bool {
        self.height < 0
    }

    pub fn hash_str(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        hash256_to_hex(&self.hash)
    }
}

/// Height and hash of the indexed main-chain tip, always read and written together.
pub struct BestBlockTracker {
    inner: Mutex<BestBlock>,
}

impl Default for BestBlockTracker {
    fn default() -> Self {
        Self {
            inner: Mutex::new(BestBlock::EMPTY),
        }
    }
}

impl BestBlockTracker {
    pub fn new(best: BestBlock) -> Self {
        Self {
            inner: Mutex::new(best),
        }
    }

    pub fn best_block(&self) -> BestBlock {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn height(&self) -> i64 {
        self.best_block().height
    }

    pub fn hash(&self) -> Hash256 {
        self.best_block().hash
    }

    pub fn hash_str(&self) -> String {
        self.best_block().hash_str()
    }

    pub fn set(&self, height: i64, hash: Hash256) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = BestBlock { height, hash };
    }

    pub fn cache_tip(&self) -> CacheTip {
        let best = self.best_block();
        CacheTip {
            height: best.height,
            hash: best.hash_str(),
        }
    }
}
