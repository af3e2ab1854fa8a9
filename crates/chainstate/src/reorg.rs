//! Main-chain flag flips for chain reorganizations and stakeholder
//! disapproval of a block's regular tree.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use chaindex_consensus::{hash256_from_hex, ChainParams};
use chaindex_log::{log_debug, log_info};
use chaindex_storage::{
    addresses, blocks, meta, stake, swaps, transactions, treasury, vins, vouts, Connection, Store,
    StoreError,
};

use crate::address_cache::AddressCache;
use crate::error::{ChainStateError, Phase, PhaseExt, Progress, RollbackReport};
use crate::tip::BestBlockTracker;
use crate::utxo_cache::UtxoCache;

/// What flipping one block touched.
#[derive(Clone, Debug, Default)]
pub struct FlipReport {
    pub previous_hash: String,
    pub height: i64,
    pub txns: usize,
    pub vins: usize,
    pub addresses: Vec<String>,
    /// Hashes of the block's transactions.
    pub tx_hashes: Vec<String>,
    /// Outpoints spent again by the parent when taking the block off the
    /// main chain lifted its voters' disapproval.
    pub relinked: Vec<(String, u32)>,
    pub restored_parent: bool,
}

/// What lifting a disapproval touched.
#[derive(Clone, Debug, Default)]
pub struct Approval {
    pub addresses: Vec<String>,
    pub relinked: Vec<(String, u32)>,
}

/// Sets `is_mainchain` on a block and every row that hangs off it.
///
/// Taking a block off the main chain also unlinks the spends its
/// transactions made, returns the tickets they spent to the live pool,
/// revives tickets the block marked missed or expired, clears the parent's
/// forward link and, when the block disapproved its parent, makes the
/// parent's regular tree valid again.
pub fn flip_block_mainchain(
    conn: &Connection,
    hash: &str,
    mainchain: bool,
    params: &ChainParams,
) -> Result<FlipReport, ChainStateError> {
    let status = blocks::block_status(conn, hash)
        .phase(Phase::Mainchain)?
        .ok_or(ChainStateError::Store {
            phase: Phase::Mainchain,
            source: StoreError::NotFound,
        })?;
    let previous_hash = blocks::set_block_mainchain(conn, hash, mainchain).phase(Phase::Mainchain)?;
    let refs = transactions::set_mainchain_by_block(conn, hash, mainchain).phase(Phase::Mainchain)?;

    let tx_ids: Vec<i64> = refs.iter().map(|tx| tx.id).collect();
    let tx_hashes: Vec<String> = refs.iter().map(|tx| tx.tx_hash.clone()).collect();
    let vin_ids: Vec<i64> = refs.iter().flat_map(|tx| tx.vin_ids.iter().copied()).collect();
    let vout_ids: Vec<i64> = refs.iter().flat_map(|tx| tx.vout_ids.iter().copied()).collect();

    let mut touched: Vec<String> = Vec::new();
    if !mainchain {
        vouts::clear_spending_by_spenders(conn, &tx_ids).phase(Phase::SpendLinkage)?;
        touched.extend(addresses::clear_matching_for_spenders(conn, &tx_hashes).phase(Phase::SpendLinkage)?);
    }
    vins::set_mainchain_by_ids(conn, &vin_ids, mainchain).phase(Phase::Mainchain)?;
    touched.extend(
        addresses::set_valid_mainchain(conn, &vout_ids, &vin_ids, mainchain).phase(Phase::Mainchain)?,
    );

    stake::set_votes_mainchain_by_block(conn, hash, mainchain).phase(Phase::Mainchain)?;
    stake::set_tickets_mainchain_by_block(conn, hash, mainchain).phase(Phase::Mainchain)?;
    treasury::set_mainchain_by_block(conn, hash, mainchain).phase(Phase::Mainchain)?;
    swaps::set_mainchain_by_block(conn, hash, mainchain).phase(Phase::Mainchain)?;

    if !mainchain {
        stake::revert_ticket_spends(conn, &tx_ids).phase(Phase::TicketSpends)?;
        let window = i64::from(params.stake.ticket_maturity) + i64::from(params.stake.ticket_expiry);
        stake::revive_tickets_for_block(conn, hash, status.height, window).phase(Phase::TicketSpends)?;
        blocks::set_next_hash(conn, &previous_hash, "").phase(Phase::Mainchain)?;
    }

    let mut restored_parent = false;
    let mut relinked = Vec::new();
    if !mainchain {
        if let Some(parent) = blocks::block_status(conn, &previous_hash).phase(Phase::Mainchain)? {
            if parent.is_mainchain && !parent.is_valid {
                let approval = restore_approval(conn, &parent.hash)?;
                touched.extend(approval.addresses);
                relinked = approval.relinked;
                restored_parent = true;
            }
        }
    }

    touched.sort();
    touched.dedup();
    Ok(FlipReport {
        previous_hash,
        height: status.height,
        txns: refs.len(),
        vins: vin_ids.len(),
        addresses: touched,
        tx_hashes,
        relinked,
        restored_parent,
    })
}

/// Undoes [`apply_disapproval`] inside an open write: the block and its
/// regular tree become valid and the spends its inputs made are linked again.
/// A main-chain block is only ever invalid because its child disapproved it,
/// so callers use this when that child leaves the main chain.
pub(crate) fn restore_approval(conn: &Connection, hash: &str) -> Result<Approval, ChainStateError> {
    blocks::set_block_valid(conn, hash, true).phase(Phase::Disapproval)?;
    let refs = transactions::set_valid_regular_by_block(conn, hash, true).phase(Phase::Disapproval)?;
    let vin_ids: Vec<i64> = refs.iter().flat_map(|tx| tx.vin_ids.iter().copied()).collect();
    let vout_ids: Vec<i64> = refs.iter().flat_map(|tx| tx.vout_ids.iter().copied()).collect();

    vins::set_valid_by_ids(conn, &vin_ids, true).phase(Phase::Disapproval)?;
    let mut touched =
        addresses::set_valid_mainchain(conn, &vout_ids, &vin_ids, true).phase(Phase::Disapproval)?;
    let mut relinked = Vec::new();
    for tx in &refs {
        for (_, vin) in vins::load_vins(conn, &tx.vin_ids[..]).phase(Phase::SpendLinkage)? {
            if vin.prev_tx_index == u32::MAX {
                continue;
            }
            let Some(record) =
                vouts::utxo_by_outpoint(conn, &vin.prev_tx_hash, vin.prev_tx_index, vin.prev_tx_tree)
                    .phase(Phase::SpendLinkage)?
            else {
                continue;
            };
            vouts::set_spending(conn, record.vout_id, tx.id).phase(Phase::SpendLinkage)?;
            touched.extend(
                addresses::set_matching_tx_for_vout(conn, record.vout_id, &tx.tx_hash)
                    .phase(Phase::SpendLinkage)?,
            );
            relinked.push((vin.prev_tx_hash, vin.prev_tx_index));
        }
    }
    log_debug!(
        "block {hash} approved again: {} regular txns valid, {} spends relinked",
        refs.len(),
        relinked.len()
    );
    touched.sort();
    touched.dedup();
    Ok(Approval {
        addresses: touched,
        relinked,
    })
}

/// Drops the cached outputs of transactions that left the main chain or
/// became invalid.
fn evict_outputs(utxo: &UtxoCache, tx_hashes: &[String]) {
    for tx_hash in tx_hashes {
        if let Ok(hash) = hash256_from_hex(tx_hash) {
            utxo.remove_tx(&hash);
        }
    }
}

fn evict_spent(utxo: &UtxoCache, outpoints: &[(String, u32)]) {
    for (tx_hash, index) in outpoints {
        if let Ok(hash) = hash256_from_hex(tx_hash) {
            utxo.get(&hash, *index);
        }
    }
}

/// Walks the tip back until it is `root`, one write per block. Each step
/// moves the meta tip and the tracker with it, so a failure or cancellation
/// leaves the store at a block boundary; the error then carries how far the
/// walk got.
pub fn rollback_to(
    store: &Store,
    params: &ChainParams,
    tip: &BestBlockTracker,
    utxo: &UtxoCache,
    address_cache: &AddressCache,
    root: &str,
    cancel: &AtomicBool,
) -> Result<RollbackReport, ChainStateError> {
    let start = tip.best_block();
    let mut report = RollbackReport {
        from_height: start.height,
        height_reached: start.height,
        ..RollbackReport::default()
    };
    let mut touched: HashSet<String> = HashSet::new();

    let result = loop {
        let current = tip.hash_str();
        if current.is_empty() || current == root {
            break Ok(());
        }
        if cancel.load(Ordering::SeqCst) {
            break Err(ChainStateError::Canceled {
                height: tip.height(),
            });
        }

        let step = store.write(|conn| -> Result<_, ChainStateError> {
            let flip = flip_block_mainchain(conn, &current, false, params)?;
            let parent = blocks::block_status(conn, &flip.previous_hash)
                .phase(Phase::Mainchain)?
                .ok_or_else(|| ChainStateError::MissingParent(flip.previous_hash.clone()))?;
            meta::set_best_block(conn, parent.height, &parent.hash).phase(Phase::Meta)?;
            Ok((flip, parent.height))
        });
        let (flip, parent_height) = match step {
            Ok(step) => step,
            Err(err) => break Err(err),
        };
        let parent_hash = match hash256_from_hex(&flip.previous_hash) {
            Ok(hash) => hash,
            Err(_) => break Err(ChainStateError::MissingParent(flip.previous_hash)),
        };
        tip.set(parent_height, parent_hash);
        evict_outputs(utxo, &flip.tx_hashes);
        evict_spent(utxo, &flip.relinked);

        report.blocks += 1;
        report.txns += flip.txns;
        report.vins += flip.vins;
        report.addresses += flip.addresses.len();
        report.height_reached = parent_height;
        touched.extend(flip.addresses);
        log_info!(
            "disconnected block {current} at height {}, tip now {} at {parent_height}",
            flip.height,
            flip.previous_hash
        );
        if flip.restored_parent {
            log_info!("block {} no longer disapproved", flip.previous_hash);
        }
    };

    if !touched.is_empty() {
        let keys: Vec<String> = touched.into_iter().collect();
        address_cache.clear(&keys);
    }
    match result {
        Ok(()) => Ok(report),
        Err(err) => Err(ChainStateError::incomplete(Progress::RolledBack(report), err)),
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DisapprovalReport {
    pub txns: usize,
    pub vins: usize,
    pub addresses: Vec<String>,
}

/// Marks a main-chain block's regular tree invalid after its child's voters
/// disapproved it. The stake tree is left alone. Returns `None` when the
/// block is unknown or not on the main chain.
pub fn apply_disapproval(
    store: &Store,
    utxo: &UtxoCache,
    address_cache: &AddressCache,
    parent_hash: &str,
) -> Result<Option<DisapprovalReport>, ChainStateError> {
    let applied = store.write(|conn| -> Result<_, ChainStateError> {
        let Some(status) = blocks::block_status(conn, parent_hash).phase(Phase::Disapproval)? else {
            return Ok(None);
        };
        if !status.is_mainchain {
            return Ok(None);
        }
        blocks::set_block_valid(conn, parent_hash, false).phase(Phase::Disapproval)?;
        let refs =
            transactions::set_valid_regular_by_block(conn, parent_hash, false).phase(Phase::Disapproval)?;

        let tx_ids: Vec<i64> = refs.iter().map(|tx| tx.id).collect();
        let tx_hashes: Vec<String> = refs.iter().map(|tx| tx.tx_hash.clone()).collect();
        let vin_ids: Vec<i64> = refs.iter().flat_map(|tx| tx.vin_ids.iter().copied()).collect();
        let vout_ids: Vec<i64> = refs.iter().flat_map(|tx| tx.vout_ids.iter().copied()).collect();

        vins::set_valid_by_ids(conn, &vin_ids, false).phase(Phase::Disapproval)?;
        vouts::clear_spending_by_spenders(conn, &tx_ids).phase(Phase::Disapproval)?;
        let mut touched =
            addresses::clear_matching_for_spenders(conn, &tx_hashes).phase(Phase::Disapproval)?;
        touched.extend(
            addresses::set_valid_mainchain(conn, &vout_ids, &vin_ids, false).phase(Phase::Disapproval)?,
        );
        touched.sort();
        touched.dedup();
        Ok(Some((refs, vin_ids.len(), touched)))
    })?;

    let Some((refs, vins, touched)) = applied else {
        log_debug!("disapproved block {parent_hash} is not on the main chain");
        return Ok(None);
    };
    let tx_hashes: Vec<String> = refs.iter().map(|tx| tx.tx_hash.clone()).collect();
    evict_outputs(utxo, &tx_hashes);
    if !touched.is_empty() {
        address_cache.clear(&touched);
    }
    log_info!(
        "block {parent_hash} disapproved: {} regular txns and {vins} inputs invalidated",
        refs.len()
    );
    Ok(Some(DisapprovalReport {
        txns: refs.len(),
        vins,
        addresses: touched,
    }))
}
