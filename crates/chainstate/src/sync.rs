//! Catching the store up with an upstream chain source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chaindex_consensus::{hash256_to_hex, Hash256};
use chaindex_log::{log_info, log_warn};
use chaindex_primitives::Block;
use chaindex_storage::blocks;

use crate::engine::ChainDb;
use crate::error::{ChainStateError, Phase, PhaseExt};
use crate::tickets::StakeSnapshot;
use crate::writer::BlockInput;

/// A block as served by the source, with the stake pool view at that block.
#[derive(Clone, Debug)]
pub struct SourceBlock {
    pub block: Block,
    pub snapshot: StakeSnapshot,
    /// Cumulative work as a hex string.
    pub chainwork: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TipStatus {
    Active,
    ValidFork,
    ValidHeaders,
    HeadersOnly,
    Invalid,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChainTipInfo {
    pub height: i64,
    pub hash: Hash256,
    pub branch_len: i64,
    pub status: TipStatus,
}

/// The upstream node. Errors are reported as text and wrapped as
/// [`ChainStateError::Source`].
pub trait ChainSource {
    fn best_block(&self) -> Result<(i64, Hash256), String>;

    fn block_hash(&self, height: i64) -> Result<Hash256, String>;

    fn block(&self, hash: &Hash256) -> Result<SourceBlock, String>;

    /// Every known chain tip, the active one included.
    fn chain_tips(&self) -> Result<Vec<ChainTipInfo>, String> {
        let (height, hash) = self.best_block()?;
        Ok(vec![ChainTipInfo {
            height,
            hash,
            branch_len: 0,
            status: TipStatus::Active,
        }])
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncReport {
    pub stored: usize,
    pub rolled_back: usize,
    pub height: i64,
}

fn source<T>(result: Result<T, String>) -> Result<T, ChainStateError> {
    result.map_err(ChainStateError::Source)
}

/// Stores every source block above the tip, rolling back first whenever the
/// source's chain no longer contains the stored tip. Blocks after a rollback
/// are stored with upserts so rows shared with the abandoned branch are
/// corrected. Cancellation is checked between blocks.
pub fn sync(db: &ChainDb, src: &dyn ChainSource, cancel: &AtomicBool) -> Result<SyncReport, ChainStateError> {
    let mut report = SyncReport {
        height: db.best_block().height,
        ..SyncReport::default()
    };
    let (node_height, _) = source(src.best_block())?;
    let interval = db.config().sync_status_interval.max(1);
    let started = Instant::now();
    let mut replaying = false;
    if report.height < node_height {
        log_info!("syncing from height {} to {node_height}", report.height + 1);
    }

    while db.best_block().height < node_height {
        if cancel.load(Ordering::SeqCst) {
            return Err(ChainStateError::Canceled {
                height: db.best_block().height,
            });
        }
        let height = db.best_block().height + 1;
        let hash = source(src.block_hash(height))?;
        let fetched = source(src.block(&hash))?;

        let tip = db.best_block();
        if !tip.is_empty() && fetched.block.header.prev_block != tip.hash {
            let root = find_common_ancestor(db, src, tip.height)?;
            log_warn!(
                "source no longer contains tip {} at {}, rolling back to {root}",
                tip.hash_str(),
                tip.height
            );
            let rollback = db.rollback_to(&root, cancel)?;
            report.rolled_back += rollback.blocks;
            replaying = true;
            continue;
        }

        let input = BlockInput {
            block: &fetched.block,
            snapshot: &fetched.snapshot,
            chainwork: &fetched.chainwork,
        };
        db.connect_block(&input, replaying)?;
        report.stored += 1;
        report.height = height;

        if height % interval == 0 || height == node_height {
            log_info!(
                "height {height}/{node_height}, {} blocks in {:.1}s",
                report.stored,
                started.elapsed().as_secs_f64()
            );
        }
    }

    report.height = db.best_block().height;
    db.set_ibd_complete(true)?;
    Ok(report)
}

/// Highest stored main-chain block the source also has at the same height.
/// Returns an empty string when no stored block matches.
pub fn find_common_ancestor(
    db: &ChainDb,
    src: &dyn ChainSource,
    from_height: i64,
) -> Result<String, ChainStateError> {
    let mut height = from_height;
    while height >= 0 {
        let stored = db
            .store()
            .read(|conn| blocks::mainchain_hash_at(conn, height).phase(Phase::Query))?;
        if let Some(stored) = stored {
            let theirs = hash256_to_hex(&source(src.block_hash(height))?);
            if stored == theirs {
                return Ok(stored);
            }
        }
        height -= 1;
    }
    Ok(String::new())
}

/// Stores side-chain blocks for every non-active tip the source reports,
/// oldest first, starting after the first block already indexed. Blocks on
/// invalid branches are stored as invalid.
pub fn import_side_chains(db: &ChainDb, src: &dyn ChainSource) -> Result<usize, ChainStateError> {
    let mut stored = 0;
    for tip in source(src.chain_tips())? {
        if tip.status == TipStatus::Active || tip.status == TipStatus::HeadersOnly {
            continue;
        }
        let mut branch = Vec::new();
        let mut hash = tip.hash;
        loop {
            let known = db
                .store()
                .read(|conn| blocks::block_exists(conn, &hash256_to_hex(&hash)).phase(Phase::Query))?;
            if known {
                break;
            }
            let fetched = source(src.block(&hash))?;
            let parent = fetched.block.header.prev_block;
            let at_genesis = fetched.block.height() == 0;
            branch.push(fetched);
            if at_genesis {
                break;
            }
            hash = parent;
        }

        let is_valid = tip.status != TipStatus::Invalid;
        let snapshot = StakeSnapshot::default();
        for fetched in branch.iter().rev() {
            let input = BlockInput {
                block: &fetched.block,
                snapshot: &snapshot,
                chainwork: &fetched.chainwork,
            };
            db.store_block(&input, is_valid, false, false)?;
            stored += 1;
        }
        if !branch.is_empty() {
            log_info!(
                "imported {} side chain blocks ending at {} ({})",
                branch.len(),
                hash256_to_hex(&tip.hash),
                tip.height
            );
        }
    }
    Ok(stored)
}
