//! The chain database: store, chain adapter and caches owned together.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chaindex_consensus::constants::{COMPATIBILITY_VERSION, MAINTENANCE_VERSION, SCHEMA_VERSION};
use chaindex_consensus::{hash256_from_hex, hash256_to_hex, ChainParams};
use chaindex_log::{log_debug, log_info, log_warn};
use chaindex_storage::{
    addresses, blocks, meta, schema, stake, swaps, transactions, treasury, vins, vouts,
    AddressBalance, AddressRow, BlockStatus, MetaRow, Store, StoreError,
};

use crate::adapter::ChainAdapter;
use crate::address_cache::{AddressCache, CacheTip, LockOutcome};
use crate::config::IndexerConfig;
use crate::error::{ChainStateError, Phase, PhaseExt, RollbackReport, StoreOutcome};
use crate::reorg;
use crate::ticket_cache::TicketIdCache;
use crate::tip::{BestBlock, BestBlockTracker};
use crate::utxo_cache::UtxoCache;
use crate::writer::{BlockInput, TreeWriter};

/// What startup repair did to reconcile the meta row with the blocks table.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RepairAction {
    None,
    /// Meta was behind or ahead of the stored chain and was reset to its tip.
    ResetMeta { height: i64 },
    /// Blocks stored past the meta tip were removed.
    Purged { blocks: usize },
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PurgeReport {
    pub blocks: usize,
    pub height: i64,
}

pub struct ChainDb {
    store: Store,
    adapter: Arc<dyn ChainAdapter>,
    config: IndexerConfig,
    utxo: UtxoCache,
    tickets: TicketIdCache,
    addresses: AddressCache,
    tip: BestBlockTracker,
}

impl ChainDb {
    /// Prepares the schema, checks the database belongs to this network and
    /// schema version, repairs a diverged meta row and loads the caches.
    pub fn open(
        store: Store,
        adapter: Arc<dyn ChainAdapter>,
        config: IndexerConfig,
    ) -> Result<Self, ChainStateError> {
        let params = adapter.params().clone();
        store.write(|conn| -> Result<(), ChainStateError> {
            schema::create_tables(conn).phase(Phase::Meta)?;
            if config.dup_checks {
                let created = schema::create_indexes(conn).phase(Phase::Meta)?;
                if created > 0 {
                    log_info!("created {created} indexes");
                }
            }
            let fresh = meta::init_meta(
                conn,
                &MetaRow {
                    net_name: params.network.name().to_string(),
                    currency_net: params.net_magic,
                    best_block_height: -1,
                    best_block_hash: String::new(),
                    compatibility_version: COMPATIBILITY_VERSION,
                    schema_version: SCHEMA_VERSION,
                    maintenance_version: MAINTENANCE_VERSION,
                    ibd_complete: false,
                },
            )
            .phase(Phase::Meta)?;
            let row = meta::load_meta(conn).phase(Phase::Meta)?.ok_or(ChainStateError::Store {
                phase: Phase::Meta,
                source: StoreError::Corruption("meta row missing".to_string()),
            })?;
            if row.schema_version != SCHEMA_VERSION {
                return Err(ChainStateError::SchemaVersion {
                    found: row.schema_version,
                    expected: SCHEMA_VERSION,
                });
            }
            if row.net_name != params.network.name() || row.currency_net != params.net_magic {
                return Err(ChainStateError::NetworkMismatch {
                    found: row.net_name,
                    expected: params.network.name().to_string(),
                });
            }
            if row.maintenance_version < MAINTENANCE_VERSION {
                meta::set_versions(conn, COMPATIBILITY_VERSION, SCHEMA_VERSION, MAINTENANCE_VERSION)
                    .phase(Phase::Meta)?;
            }
            for deployment in &params.deployments {
                stake::insert_agenda(conn, deployment.id, deployment.vote_version, deployment.mask)
                    .phase(Phase::Meta)?;
            }
            if fresh {
                log_info!("initialized new {} database", params.network.name());
            }
            Ok(())
        })?;

        let db = Self {
            store,
            adapter,
            addresses: AddressCache::new(config.address_cache_capacity),
            config,
            utxo: UtxoCache::new(),
            tickets: TicketIdCache::new(),
            tip: BestBlockTracker::default(),
        };
        let action = db.repair_meta()?;
        if action != RepairAction::None {
            log_warn!("meta repair: {action:?}");
        }
        db.load_tip()?;
        let live = db.store.read(|conn| db.tickets.load_unspent(conn).phase(Phase::Query))?;
        log_debug!("loaded {live} unspent tickets");
        Ok(db)
    }

    fn load_tip(&self) -> Result<BestBlock, ChainStateError> {
        let tip = self.store.read(|conn| blocks::mainchain_tip(conn).phase(Phase::Query))?;
        let best = match tip {
            Some(status) => BestBlock {
                height: status.height,
                hash: parse_hash(&status.hash)?,
            },
            None => BestBlock::EMPTY,
        };
        self.tip.set(best.height, best.hash);
        Ok(best)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn adapter(&self) -> &dyn ChainAdapter {
        self.adapter.as_ref()
    }

    pub fn params(&self) -> &ChainParams {
        self.adapter.params()
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn utxo_cache(&self) -> &UtxoCache {
        &self.utxo
    }

    pub fn ticket_cache(&self) -> &TicketIdCache {
        &self.tickets
    }

    pub fn address_cache(&self) -> &AddressCache {
        &self.addresses
    }

    pub fn best_block(&self) -> BestBlock {
        self.tip.best_block()
    }

    pub fn tip(&self) -> &BestBlockTracker {
        &self.tip
    }

    /// Stores a block with explicit validity and main-chain flags. The tip
    /// moves only for main-chain blocks and only after everything committed.
    pub fn store_block(
        &self,
        input: &BlockInput<'_>,
        is_valid: bool,
        is_mainchain: bool,
        update_existing: bool,
    ) -> Result<StoreOutcome, ChainStateError> {
        let writer = TreeWriter {
            store: &self.store,
            adapter: self.adapter.as_ref(),
            utxo: &self.utxo,
            tickets: &self.tickets,
            mode: self.config.insert_mode(update_existing),
            update_address_spends: self.config.update_address_spends,
        };
        let (outcome, touched) = writer.write_block(input, is_valid, is_mainchain)?;
        if is_mainchain {
            self.tip.set(input.block.height(), input.block.hash());
        }
        if !touched.is_empty() {
            let keys: Vec<String> = touched.into_iter().collect();
            self.addresses.clear(&keys);
        }
        Ok(outcome)
    }

    /// Extends the main chain by one block. The block must build on the
    /// tracked tip. When its voters disapproved the parent, the parent's
    /// regular tree is invalidated first.
    ///
    /// Rows already stored for the block are overwritten when it was seen
    /// before or when `update_existing` is set, as when replaying a branch
    /// after a rollback.
    pub fn connect_block(
        &self,
        input: &BlockInput<'_>,
        update_existing: bool,
    ) -> Result<StoreOutcome, ChainStateError> {
        let block = input.block;
        let best = self.tip.best_block();
        if !best.is_empty() && best.hash != block.header.prev_block {
            return Err(ChainStateError::MissingParent(hash256_to_hex(&block.header.prev_block)));
        }

        let height = block.height();
        if !best.is_empty()
            && self.adapter.has_stake_tree()
            && self.params().stake.votes_apply(height)
            && !block.header.approves_parent()
        {
            reorg::apply_disapproval(
                &self.store,
                &self.utxo,
                &self.addresses,
                &hash256_to_hex(&block.header.prev_block),
            )?;
        }

        let hash = hash256_to_hex(&block.hash());
        let known = self
            .store
            .read(|conn| blocks::block_exists(conn, &hash).phase(Phase::Query))?;
        self.store_block(input, true, true, known || update_existing)
    }

    /// Takes blocks off the main chain until the tip is `root`.
    pub fn rollback_to(&self, root: &str, cancel: &AtomicBool) -> Result<RollbackReport, ChainStateError> {
        reorg::rollback_to(
            &self.store,
            self.params(),
            &self.tip,
            &self.utxo,
            &self.addresses,
            root,
            cancel,
        )
    }

    /// Deletes the `count` best main-chain blocks and everything stored for
    /// them. Inputs, outputs and address rows shared with a copy of the same
    /// transaction in another block are kept.
    pub fn purge_best_blocks(&self, count: usize) -> Result<PurgeReport, ChainStateError> {
        let window = i64::from(self.params().stake.ticket_maturity)
            + i64::from(self.params().stake.ticket_expiry);
        let mut report = PurgeReport {
            blocks: 0,
            height: self.tip.height(),
        };
        for _ in 0..count {
            let purged = self.store.write(|conn| -> Result<_, ChainStateError> {
                let Some(tip) = blocks::mainchain_tip(conn).phase(Phase::Purge)? else {
                    return Ok(None);
                };
                let refs = transactions::tx_refs_in_block(conn, &tip.hash).phase(Phase::Purge)?;
                let tx_ids: Vec<i64> = refs.iter().map(|tx| tx.id).collect();
                let tx_hashes: Vec<String> = refs.iter().map(|tx| tx.tx_hash.clone()).collect();
                vouts::clear_spending_by_spenders(conn, &tx_ids).phase(Phase::Purge)?;
                addresses::clear_matching_for_spenders(conn, &tx_hashes).phase(Phase::Purge)?;
                stake::revert_ticket_spends(conn, &tx_ids).phase(Phase::Purge)?;
                stake::revive_tickets_for_block(conn, &tip.hash, tip.height, window).phase(Phase::Purge)?;

                let mut vin_ids = Vec::new();
                let mut vout_ids = Vec::new();
                for tx in &refs {
                    if transactions::count_other_blocks(conn, &tx.tx_hash, &tip.hash).phase(Phase::Purge)? == 0 {
                        vin_ids.extend(tx.vin_ids.iter().copied());
                        vout_ids.extend(tx.vout_ids.iter().copied());
                    }
                }
                addresses::delete_by_row_ids(conn, &vout_ids, &vin_ids).phase(Phase::Purge)?;
                vins::delete_by_ids(conn, &vin_ids).phase(Phase::Purge)?;
                vouts::delete_by_ids(conn, &vout_ids).phase(Phase::Purge)?;
                stake::delete_by_block(conn, &tip.hash).phase(Phase::Purge)?;
                treasury::delete_by_block(conn, &tip.hash).phase(Phase::Purge)?;
                swaps::delete_by_block(conn, &tip.hash).phase(Phase::Purge)?;
                transactions::delete_by_block(conn, &tip.hash).phase(Phase::Purge)?;
                blocks::delete_block(conn, &tip.hash).phase(Phase::Purge)?;

                let parent = blocks::block_status(conn, &tip.previous_hash).phase(Phase::Purge)?;
                if let Some(parent) = parent.as_ref().filter(|parent| parent.is_mainchain && !parent.is_valid) {
                    reorg::restore_approval(conn, &parent.hash)?;
                }
                let (height, hash) = match &parent {
                    Some(parent) => (parent.height, parent.hash.clone()),
                    None => (-1, String::new()),
                };
                meta::set_best_block(conn, height, &hash).phase(Phase::Meta)?;
                Ok(Some((tip, parent)))
            })?;
            let Some((removed, parent)) = purged else {
                break;
            };
            log_info!("purged block {} at height {}", removed.hash, removed.height);
            report.blocks += 1;
            self.set_tip_from(parent.as_ref())?;
            report.height = self.tip.height();
        }

        if report.blocks > 0 {
            self.utxo.clear();
            self.addresses.clear_all();
            self.store.read(|conn| self.tickets.load_unspent(conn).phase(Phase::Query))?;
        }
        Ok(report)
    }

    fn set_tip_from(&self, status: Option<&BlockStatus>) -> Result<(), ChainStateError> {
        match status {
            Some(status) => self.tip.set(status.height, parse_hash(&status.hash)?),
            None => self.tip.set(BestBlock::EMPTY.height, BestBlock::EMPTY.hash),
        }
        Ok(())
    }

    /// Reconciles the meta best block with the highest main-chain block. Meta
    /// is written last when storing, so blocks past it are partial and get
    /// purged; a meta row ahead of the blocks table is pulled back.
    pub fn repair_meta(&self) -> Result<RepairAction, ChainStateError> {
        let (row, tip) = self.store.read(|conn| -> Result<_, ChainStateError> {
            let row = meta::load_meta(conn).phase(Phase::Meta)?;
            let tip = blocks::mainchain_tip(conn).phase(Phase::Meta)?;
            Ok((row, tip))
        })?;
        let Some(row) = row else {
            return Err(ChainStateError::Store {
                phase: Phase::Meta,
                source: StoreError::Corruption("meta row missing".to_string()),
            });
        };
        let (blocks_height, blocks_hash) = tip
            .as_ref()
            .map_or((-1, String::new()), |tip| (tip.height, tip.hash.clone()));
        if row.best_block_height == blocks_height && row.best_block_hash == blocks_hash {
            return Ok(RepairAction::None);
        }
        log_warn!(
            "{}",
            ChainStateError::MetaMismatch {
                meta_height: row.best_block_height,
                blocks_height,
            }
        );

        if blocks_height > row.best_block_height {
            let excess = (blocks_height - row.best_block_height) as usize;
            let report = self.purge_best_blocks(excess)?;
            return Ok(RepairAction::Purged {
                blocks: report.blocks,
            });
        }
        self.store.write(|conn| {
            meta::set_best_block(conn, blocks_height, &blocks_hash).phase(Phase::Meta)
        })?;
        Ok(RepairAction::ResetMeta {
            height: blocks_height,
        })
    }

    pub fn set_ibd_complete(&self, complete: bool) -> Result<(), ChainStateError> {
        self.store
            .write(|conn| meta::set_ibd_complete(conn, complete).phase(Phase::Meta))
    }

    /// Reloads the UTXO cache from the store's unspent main-chain outputs.
    pub fn reinit_utxo_cache(&self) -> Result<usize, ChainStateError> {
        let outputs = self
            .store
            .read(|conn| vouts::unspent_outputs(conn).phase(Phase::Query))?;
        let entries: Vec<_> = outputs
            .into_iter()
            .filter_map(|(hash, index, _tree, record)| {
                hash256_from_hex(&hash).ok().map(|hash| (hash, index, record))
            })
            .collect();
        let count = entries.len();
        self.utxo.reinit(entries);
        log_info!("UTXO cache loaded with {count} outputs");
        Ok(count)
    }

    /// Balance of `address` as of the tracked tip, recomputed at most once
    /// concurrently per address.
    pub fn address_balance(&self, address: &str) -> Result<AddressBalance, ChainStateError> {
        loop {
            let tip = self.tip.cache_tip();
            if let Some((balance, at)) = self.addresses.balance(address) {
                if at == tip {
                    return Ok(balance);
                }
                log_stale(address, &at, &tip);
            }
            match self.addresses.try_lock_update(address) {
                LockOutcome::Acquired(_guard) => {
                    let balance = self
                        .store
                        .read(|conn| addresses::balance(conn, address).phase(Phase::Query))?;
                    self.addresses.store_balance(address, &balance, tip);
                    return Ok(balance);
                }
                LockOutcome::Busy(waiter) => waiter.wait(),
            }
        }
    }

    /// One page of the rows recorded for `address`, newest first.
    pub fn address_rows(
        &self,
        address: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AddressRow>, ChainStateError> {
        loop {
            let tip = self.tip.cache_tip();
            if let Some((rows, at)) = self.addresses.rows(address) {
                if at == tip {
                    return Ok(page(rows, limit, offset));
                }
                log_stale(address, &at, &tip);
            }
            match self.addresses.try_lock_update(address) {
                LockOutcome::Acquired(_guard) => {
                    let rows = self
                        .store
                        .read(|conn| addresses::rows_for_address(conn, address).phase(Phase::Query))?;
                    self.addresses.store_rows(address, &rows, tip);
                    return Ok(page(rows, limit, offset));
                }
                LockOutcome::Busy(waiter) => waiter.wait(),
            }
        }
    }
}

fn page(rows: Vec<AddressRow>, limit: usize, offset: usize) -> Vec<AddressRow> {
    rows.into_iter().skip(offset).take(limit).collect()
}

fn log_stale(address: &str, at: &CacheTip, tip: &CacheTip) {
    log_debug!(
        "cached data for {address} is from height {} ({}), tip is {} ({})",
        at.height,
        at.hash,
        tip.height,
        tip.hash
    );
}

fn parse_hash(hex: &str) -> Result<chaindex_consensus::Hash256, ChainStateError> {
    hash256_from_hex(hex).map_err(|err| ChainStateError::Store {
        phase: Phase::Query,
        source: StoreError::Encoding(format!("block hash {hex}: {err}")),
    })
}
