//! Writes a block in two phases.
//!
//! Phase one stores each transaction tree in its own write: outputs, then
//! inputs, then transaction rows that embed the generated ids. The stake tree
//! also stores tickets, votes, misses and treasury rows and resolves ticket
//! spends in that write. The two trees run on separate rayon workers.
//!
//! Phase two runs after both trees commit: the block row, address rows, spend
//! linkage and swaps, plus the meta tip for main-chain blocks.

use std::collections::HashSet;

use chaindex_consensus::{hash256_from_hex, hash256_to_hex};
use chaindex_log::{log_debug, log_trace};
use chaindex_primitives::{Block, TxTree};
use chaindex_script::extract_swap_spend;
use chaindex_storage::{
    addresses, blocks, meta, swaps, transactions, treasury, vins, vouts, AddressRow, BlockRow,
    Connection, InsertMode, RowIds, Store, StoreError, SwapRow, UtxoRecord, VinRow,
};

use crate::adapter::ChainAdapter;
use crate::decompose::{decompose_tree, propagate_stake_mixed, treasury_rows, DecomposedTree};
use crate::error::{ChainStateError, Phase, PhaseExt, Progress, StoreOutcome};
use crate::ticket_cache::TicketIdCache;
use crate::tickets::{self, StakeContext, StakeSnapshot};
use crate::utxo_cache::UtxoCache;

/// A block as delivered by the chain source.
#[derive(Clone, Debug)]
pub struct BlockInput<'a> {
    pub block: &'a Block,
    pub snapshot: &'a StakeSnapshot,
    /// Cumulative work as reported upstream, hex.
    pub chainwork: &'a str,
}

#[derive(Clone, Debug)]
pub struct BlockContext {
    pub hash: String,
    pub parent_hash: String,
    pub height: i64,
    pub time: i64,
    pub is_valid: bool,
    pub is_mainchain: bool,
}

impl BlockContext {
    pub fn new(block: &Block, is_valid: bool, is_mainchain: bool) -> Self {
        Self {
            hash: hash256_to_hex(&block.hash()),
            parent_hash: hash256_to_hex(&block.header.prev_block),
            height: block.height(),
            time: i64::from(block.header.timestamp),
            is_valid,
            is_mainchain,
        }
    }
}

/// Row ids generated for one transaction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TxIds {
    pub tx_id: i64,
    pub vin_ids: RowIds,
    pub vout_ids: RowIds,
}

/// What storing one tree produced. `error` is set when the write rolled back;
/// the counts then describe nothing committed.
#[derive(Debug)]
pub struct TreeStoreResult {
    pub tree: TxTree,
    pub outcome: StoreOutcome,
    pub ids: Vec<TxIds>,
    pub addresses: HashSet<String>,
    pub error: Option<ChainStateError>,
}

impl TreeStoreResult {
    fn empty(tree: TxTree) -> Self {
        Self {
            tree,
            outcome: StoreOutcome::default(),
            ids: Vec::new(),
            addresses: HashSet::new(),
            error: None,
        }
    }
}

/// Combines the per-tree results. Fails when either tree failed, carrying the
/// counts of whichever tree succeeded.
pub fn merge_tree_results(
    regular: TreeStoreResult,
    stake: TreeStoreResult,
) -> Result<(StoreOutcome, Vec<TxIds>, Vec<TxIds>, HashSet<String>), ChainStateError> {
    let mut outcome = StoreOutcome {
        height: regular.outcome.height.max(stake.outcome.height),
        ..StoreOutcome::default()
    };
    for part in [&regular.outcome, &stake.outcome] {
        outcome.num_txns += part.num_txns;
        outcome.num_vins += part.num_vins;
        outcome.num_vouts += part.num_vouts;
        outcome.num_tickets += part.num_tickets;
        outcome.num_votes += part.num_votes;
        outcome.num_misses += part.num_misses;
        outcome.num_treasury += part.num_treasury;
        outcome.mix_delta += part.mix_delta;
    }
    match (regular.error, stake.error) {
        (None, None) => {
            let mut addresses = regular.addresses;
            addresses.extend(stake.addresses);
            Ok((outcome, regular.ids, stake.ids, addresses))
        }
        (Some(err), None) | (None, Some(err)) => {
            Err(ChainStateError::incomplete(Progress::Stored(outcome), err))
        }
        (Some(err), Some(other)) => {
            log_debug!("both trees failed; second error: {other}");
            Err(ChainStateError::incomplete(Progress::Stored(outcome), err))
        }
    }
}

/// Shared state the block writer works against.
pub struct TreeWriter<'a> {
    pub store: &'a Store,
    pub adapter: &'a dyn ChainAdapter,
    pub utxo: &'a UtxoCache,
    pub tickets: &'a TicketIdCache,
    pub mode: InsertMode,
    pub update_address_spends: bool,
}

/// Counts from the stake-only steps of a tree write.
#[derive(Default)]
struct StakeRows {
    tickets: Vec<(String, i64)>,
    votes: usize,
    misses: usize,
    treasury: usize,
}

impl TreeWriter<'_> {
    /// Stores one decomposed tree. Never returns early with an error: the
    /// error is carried in the result so the sibling tree can still report.
    pub fn store_tree(
        &self,
        input: &BlockInput<'_>,
        ctx: &BlockContext,
        tree: &DecomposedTree,
    ) -> TreeStoreResult {
        let mut result = TreeStoreResult::empty(tree.tree);
        if tree.txs.is_empty() {
            result.outcome.height = ctx.height;
            return result;
        }

        let written = self.store.write(|conn| -> Result<_, ChainStateError> {
            let ids = insert_tree_rows(conn, tree, self.mode)?;
            let stake = if tree.tree == TxTree::Stake && self.adapter.has_stake_tree() {
                self.store_stake_rows(conn, input, ctx, tree, &ids)?
            } else {
                StakeRows::default()
            };
            Ok((ids, stake))
        });

        match written {
            Ok((ids, stake)) => {
                if ctx.is_mainchain {
                    self.cache_outputs(tree, &ids);
                    for (hash, id) in &stake.tickets {
                        self.tickets.set(hash, *id);
                    }
                }
                result.outcome = StoreOutcome {
                    height: ctx.height,
                    num_txns: ids.len(),
                    num_vins: tree.num_vins(),
                    num_vouts: tree.num_vouts(),
                    num_tickets: stake.tickets.len(),
                    num_votes: stake.votes,
                    num_misses: stake.misses,
                    num_treasury: stake.treasury,
                    mix_delta: if ctx.is_mainchain && (ctx.is_valid || tree.tree == TxTree::Stake) {
                        tree.mixed_value()
                    } else {
                        0
                    },
                    ..StoreOutcome::default()
                };
                result.addresses = tree
                    .txs
                    .iter()
                    .flat_map(|tx| tx.vouts.iter())
                    .flat_map(|vout| vout.script_addresses.iter().cloned())
                    .collect();
                result.ids = ids;
            }
            Err(err) => result.error = Some(err),
        }
        result
    }

    fn store_stake_rows(
        &self,
        conn: &Connection,
        input: &BlockInput<'_>,
        ctx: &BlockContext,
        tree: &DecomposedTree,
        ids: &[TxIds],
    ) -> Result<StakeRows, ChainStateError> {
        let txs = input.block.tree(TxTree::Stake);
        let tx_ids: Vec<i64> = ids.iter().map(|ids| ids.tx_id).collect();
        let stake_ctx = StakeContext {
            block_hash: &ctx.hash,
            parent_hash: &ctx.parent_hash,
            height: ctx.height,
            block_time: ctx.time,
            is_mainchain: ctx.is_mainchain,
            snapshot: input.snapshot,
        };
        let params = self.adapter.params();

        let purchases =
            tickets::insert_tickets(conn, &stake_ctx, txs, tree, &tx_ids, self.adapter, self.mode)
                .phase(Phase::InsertTickets)?;
        let votes = tickets::insert_votes_and_misses(
            conn,
            &stake_ctx,
            txs,
            tree,
            &tx_ids,
            self.adapter,
            self.tickets,
            self.mode,
        )
        .phase(Phase::InsertVotes)?;

        let treasury = treasury_rows(input.block, tree);
        for row in &treasury {
            treasury::insert_treasury(conn, row, self.mode).phase(Phase::InsertTreasury)?;
        }

        let mut spends = votes.spends.clone();
        spends.extend(
            tickets::collect_revocations(conn, &stake_ctx, txs, tree, &tx_ids, self.tickets)
                .phase(Phase::TicketSpends)?,
        );
        tickets::resolve_stake_spends(conn, &stake_ctx, params, &spends).phase(Phase::TicketSpends)?;
        tickets::sweep_pool_status(conn, &stake_ctx, params, &votes.misses).phase(Phase::TicketSpends)?;

        Ok(StakeRows {
            tickets: purchases,
            votes: votes.votes,
            misses: votes.misses.len(),
            treasury: treasury.len(),
        })
    }

    fn cache_outputs(&self, tree: &DecomposedTree, ids: &[TxIds]) {
        for (tx, ids) in tree.txs.iter().zip(ids) {
            for (vout, vout_id) in tx.vouts.iter().zip(&ids.vout_ids) {
                if vout.value <= 0 {
                    continue;
                }
                self.utxo.set(
                    tx.txid,
                    vout.tx_index,
                    UtxoRecord {
                        vout_id: *vout_id,
                        value: vout.value,
                        addresses: vout.script_addresses.clone(),
                        mixed: vout.mixed,
                    },
                );
            }
        }
    }

    /// Decomposes and stores a whole block. Returns the merged counts and the
    /// addresses whose cached data the block invalidates.
    pub fn write_block(
        &self,
        input: &BlockInput<'_>,
        is_valid: bool,
        is_mainchain: bool,
    ) -> Result<(StoreOutcome, HashSet<String>), ChainStateError> {
        let ctx = BlockContext::new(input.block, is_valid, is_mainchain);
        let regular = decompose_tree(input.block, TxTree::Regular, self.adapter, is_valid, is_mainchain);
        let mut stake = if self.adapter.has_stake_tree() {
            decompose_tree(input.block, TxTree::Stake, self.adapter, is_valid, is_mainchain)
        } else {
            DecomposedTree {
                tree: TxTree::Stake,
                txs: Vec::new(),
            }
        };
        if !stake.txs.is_empty() {
            self.store.read(|conn| {
                propagate_stake_mixed(&mut stake, &regular, |hash, index, tree| {
                    if let Some(record) = self.utxo.peek(hash, index) {
                        return Ok(Some(record.mixed));
                    }
                    vouts::vout_mixed(conn, &hash256_to_hex(hash), index, tree.as_i16())
                        .phase(Phase::Query)
                })
            })?;
        }

        let (regular_result, stake_result) = rayon::join(
            || self.store_tree(input, &ctx, &regular),
            || self.store_tree(input, &ctx, &stake),
        );
        let (mut outcome, regular_ids, stake_ids, mut touched) =
            merge_tree_results(regular_result, stake_result)?;

        let phase_two = self.store.write(|conn| -> Result<_, ChainStateError> {
            let block_row = block_row(input, &ctx, self.adapter, &regular_ids, &stake_ids);
            let block_id = blocks::insert_block(conn, &block_row, self.mode).phase(Phase::InsertBlock)?;
            blocks::insert_block_chain(conn, block_id, &ctx.parent_hash, &ctx.hash)
                .phase(Phase::InsertBlock)?;

            let mut rows = 0;
            let mut links = SpendLinks::default();
            let mut num_swaps = 0;
            for (tree, ids) in [(&regular, &regular_ids), (&stake, &stake_ids)] {
                rows += insert_address_rows(conn, tree, ids, self.mode).phase(Phase::InsertAddresses)?;
                link_spends(conn, self.utxo, tree, ids, self.mode, self.update_address_spends, &mut links)
                    .phase(Phase::SpendLinkage)?;
                num_swaps += insert_swaps(conn, input.block, &ctx, tree, self.adapter, self.mode)
                    .phase(Phase::InsertSwaps)?;
            }

            if ctx.is_mainchain {
                blocks::set_next_hash(conn, &ctx.parent_hash, &ctx.hash).phase(Phase::InsertBlock)?;
                meta::set_best_block(conn, ctx.height, &ctx.hash).phase(Phase::Meta)?;
            }
            Ok((rows, links, num_swaps))
        });

        match phase_two {
            Ok((funding_rows, links, num_swaps)) => {
                outcome.num_addresses = funding_rows + links.spending_rows;
                outcome.num_spends_linked = links.linked;
                outcome.num_swaps = num_swaps;
                outcome.mix_delta -= links.mixed_spent;
                touched.extend(links.addresses);
                log_debug!(
                    "stored block {} at {}: {} txns, {} vins, {} vouts, {} address rows, {} spends linked",
                    ctx.hash,
                    ctx.height,
                    outcome.num_txns,
                    outcome.num_vins,
                    outcome.num_vouts,
                    outcome.num_addresses,
                    outcome.num_spends_linked
                );
                Ok((outcome, touched))
            }
            Err(err) => Err(ChainStateError::incomplete(Progress::Stored(outcome), err)),
        }
    }
}

fn insert_tree_rows(
    conn: &Connection,
    tree: &DecomposedTree,
    mode: InsertMode,
) -> Result<Vec<TxIds>, ChainStateError> {
    let mut ids: Vec<TxIds> = tree.txs.iter().map(|_| TxIds::default()).collect();

    let mut inserted = 0;
    for (tx, ids) in tree.txs.iter().zip(ids.iter_mut()) {
        for vout in &tx.vouts {
            ids.vout_ids.push(vouts::insert_vout(conn, vout, mode).phase(Phase::InsertVouts)?);
            inserted += 1;
        }
    }
    check_count("vouts", tree.num_vouts(), inserted)?;

    inserted = 0;
    for (tx, ids) in tree.txs.iter().zip(ids.iter_mut()) {
        for vin in &tx.vins {
            ids.vin_ids.push(vins::insert_vin(conn, vin, mode).phase(Phase::InsertVins)?);
            inserted += 1;
        }
    }
    check_count("vins", tree.num_vins(), inserted)?;

    for (tx, ids) in tree.txs.iter().zip(ids.iter_mut()) {
        let mut row = tx.row.clone();
        row.vin_db_ids = ids.vin_ids.clone();
        row.vout_db_ids = ids.vout_ids.clone();
        ids.tx_id = transactions::insert_transaction(conn, &row, mode).phase(Phase::InsertTxns)?;
    }
    Ok(ids)
}

fn check_count(what: &'static str, expected: usize, got: usize) -> Result<(), ChainStateError> {
    if expected != got {
        return Err(ChainStateError::RowCountMismatch { what, expected, got });
    }
    Ok(())
}

fn block_row(
    input: &BlockInput<'_>,
    ctx: &BlockContext,
    adapter: &dyn ChainAdapter,
    regular_ids: &[TxIds],
    stake_ids: &[TxIds],
) -> BlockRow {
    let header = &input.block.header;
    BlockRow {
        hash: ctx.hash.clone(),
        height: ctx.height,
        size: input.block.serialized_size() as i64,
        is_valid: ctx.is_valid,
        is_mainchain: ctx.is_mainchain,
        version: header.version,
        num_rtx: input.block.transactions.len() as i64,
        num_stx: input.block.stake_transactions.len() as i64,
        tx_db_ids: regular_ids.iter().map(|ids| ids.tx_id).collect(),
        stx_db_ids: stake_ids.iter().map(|ids| ids.tx_id).collect(),
        time: ctx.time,
        nonce: i64::from(header.nonce),
        vote_bits: header.vote_bits,
        voters: header.voters,
        fresh_stake: header.fresh_stake,
        revocations: header.revocations,
        pool_size: header.pool_size,
        bits: header.bits,
        sbits: header.sbits,
        difficulty: adapter.params().difficulty(header.bits),
        stake_version: header.stake_version,
        previous_hash: ctx.parent_hash.clone(),
        chainwork: input.chainwork.to_string(),
        winners: input.snapshot.winners.iter().map(hash256_to_hex).collect(),
    }
}

/// Inserts one funding row per address of every output in the tree.
pub fn insert_address_rows(
    conn: &Connection,
    tree: &DecomposedTree,
    ids: &[TxIds],
    mode: InsertMode,
) -> Result<usize, StoreError> {
    let mut count = 0;
    for (tx, ids) in tree.txs.iter().zip(ids) {
        let valid_mainchain = tx.is_valid_mainchain();
        for (vout, vout_id) in tx.vouts.iter().zip(&ids.vout_ids) {
            for address in &vout.script_addresses {
                addresses::insert_address_row(
                    conn,
                    &AddressRow {
                        address: address.clone(),
                        tx_hash: tx.row.tx_hash.clone(),
                        valid_mainchain,
                        matching_tx_hash: String::new(),
                        value: vout.value,
                        block_time: tx.row.block_time,
                        is_funding: true,
                        tx_vin_vout_index: vout.tx_index,
                        tx_vin_vout_row_id: *vout_id,
                        tx_type: tx.row.tx_type,
                    },
                    mode,
                )?;
                count += 1;
            }
        }
    }
    Ok(count)
}

#[derive(Debug, Default)]
pub struct SpendLinks {
    pub spending_rows: usize,
    pub linked: usize,
    pub unresolved: usize,
    pub mixed_spent: i64,
    pub addresses: HashSet<String>,
}

fn is_null_prevout(vin: &VinRow) -> bool {
    vin.prev_tx_index == u32::MAX
}

/// Resolves the output each input spends and records the spend: a spending
/// address row per funding address and, for valid main-chain spenders, the
/// vout's spending transaction and the funding rows' matching hash.
///
/// Valid main-chain spenders consume the UTXO cache entry; anything else only
/// peeks, since the output can still be spent on the main chain later.
pub fn link_spends(
    conn: &Connection,
    utxo: &UtxoCache,
    tree: &DecomposedTree,
    ids: &[TxIds],
    mode: InsertMode,
    update_spends: bool,
    links: &mut SpendLinks,
) -> Result<(), StoreError> {
    for (tx, ids) in tree.txs.iter().zip(ids) {
        let spender_live = tx.is_valid_mainchain();
        for (vin, vin_id) in tx.vins.iter().zip(&ids.vin_ids) {
            if is_null_prevout(vin) {
                continue;
            }
            let Ok(prev_hash) = hash256_from_hex(&vin.prev_tx_hash) else {
                continue;
            };
            let cached = if spender_live {
                utxo.get(&prev_hash, vin.prev_tx_index)
            } else {
                utxo.peek(&prev_hash, vin.prev_tx_index)
            };
            let record = match cached {
                Some(record) => record,
                None => match vouts::utxo_by_outpoint(conn, &vin.prev_tx_hash, vin.prev_tx_index, vin.prev_tx_tree)? {
                    Some(record) => record,
                    None => {
                        log_trace!(
                            "{}:{} spends unindexed output {}:{}",
                            vin.tx_hash,
                            vin.tx_index,
                            vin.prev_tx_hash,
                            vin.prev_tx_index
                        );
                        links.unresolved += 1;
                        continue;
                    }
                },
            };

            for address in &record.addresses {
                addresses::insert_address_row(
                    conn,
                    &AddressRow {
                        address: address.clone(),
                        tx_hash: tx.row.tx_hash.clone(),
                        valid_mainchain: spender_live,
                        matching_tx_hash: vin.prev_tx_hash.clone(),
                        value: record.value,
                        block_time: tx.row.block_time,
                        is_funding: false,
                        tx_vin_vout_index: vin.tx_index,
                        tx_vin_vout_row_id: *vin_id,
                        tx_type: tx.row.tx_type,
                    },
                    mode,
                )?;
                links.spending_rows += 1;
                links.addresses.insert(address.clone());
            }

            if spender_live {
                if update_spends {
                    links
                        .addresses
                        .extend(addresses::set_matching_tx_for_vout(conn, record.vout_id, &tx.row.tx_hash)?);
                    vouts::set_spending(conn, record.vout_id, ids.tx_id)?;
                    links.linked += 1;
                }
                if record.mixed {
                    links.mixed_spent += record.value;
                }
            }
        }
    }
    Ok(())
}

/// Records inputs that redeem or refund an atomic swap contract.
pub fn insert_swaps(
    conn: &Connection,
    block: &Block,
    ctx: &BlockContext,
    tree: &DecomposedTree,
    adapter: &dyn ChainAdapter,
    mode: InsertMode,
) -> Result<usize, StoreError> {
    let mut count = 0;
    for (tx, dtx) in block.tree(tree.tree).iter().zip(&tree.txs) {
        for (input, vin) in tx.inputs.iter().zip(&dtx.vins) {
            if is_null_prevout(vin) {
                continue;
            }
            let Some(spend) = extract_swap_spend(&input.signature_script, adapter.params()) else {
                continue;
            };
            let is_refund = spend.is_refund();
            let row = SwapRow {
                contract_tx: vin.prev_tx_hash.clone(),
                contract_vout: vin.prev_tx_index,
                spend_tx: dtx.row.tx_hash.clone(),
                spend_vin: vin.tx_index,
                spend_height: ctx.height,
                spend_block_hash: ctx.hash.clone(),
                p2sh_addr: spend.p2sh_address,
                value: input.value_in,
                secret_hash: spend.contract.secret_hash.to_vec(),
                secret: spend.secret,
                lock_time: spend.contract.lock_time,
                is_refund,
                is_mainchain: ctx.is_mainchain,
            };
            if swaps::insert_swap(conn, &row, mode)? {
                count += 1;
            }
        }
    }
    Ok(count)
}
