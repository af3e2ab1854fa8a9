//! Ticket, vote and miss rows for a block's stake tree, and the pool status
//! transitions they cause.

use std::collections::HashSet;

use chaindex_consensus::{hash256_to_hex, ChainParams, Hash256};
use chaindex_log::{log_debug, log_warn};
use chaindex_primitives::Transaction;
use chaindex_script::stake::spent_ticket;
use chaindex_script::{parse_vote, TxType};
use chaindex_storage::{
    stake, AgendaVoteRow, Connection, InsertMode, MissRow, PoolStatus, SpendType, StoreError,
    TSpendVoteRow, TicketRow, VoteRow,
};

use crate::adapter::ChainAdapter;
use crate::decompose::DecomposedTree;
use crate::ticket_cache::TicketIdCache;

/// Stake pool view the upstream node reports for a block.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StakeSnapshot {
    /// Tickets selected to vote on this block.
    pub winners: Vec<Hash256>,
    /// Tickets that finished their expiry window at this block.
    pub expired: Vec<Hash256>,
    /// Tickets that were selected and did not vote.
    pub missed: Vec<Hash256>,
}

/// Where in the chain the stake rows being written live.
#[derive(Clone, Debug)]
pub struct StakeContext<'a> {
    pub block_hash: &'a str,
    pub parent_hash: &'a str,
    pub height: i64,
    pub block_time: i64,
    pub is_mainchain: bool,
    pub snapshot: &'a StakeSnapshot,
}

/// A vote or revocation spending a stored ticket.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StakeSpend {
    pub ticket_hash: String,
    pub ticket_id: i64,
    pub spend_tx_id: i64,
    pub kind: TxType,
}

#[derive(Clone, Debug, Default)]
pub struct VoteBatch {
    pub votes: usize,
    pub agenda_votes: usize,
    pub tspend_votes: usize,
    pub misses: Vec<String>,
    pub spends: Vec<StakeSpend>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SweepCounts {
    pub missed: usize,
    pub expired: usize,
}

/// Inserts a `tickets` row per ticket purchase and returns (hash, row id)
/// pairs for the ticket id cache.
pub fn insert_tickets(
    conn: &Connection,
    ctx: &StakeContext<'_>,
    txs: &[Transaction],
    tree: &DecomposedTree,
    tx_ids: &[i64],
    adapter: &dyn ChainAdapter,
    mode: InsertMode,
) -> Result<Vec<(String, i64)>, StoreError> {
    let mut inserted = Vec::new();
    for ((tx, dtx), tx_id) in txs.iter().zip(&tree.txs).zip(tx_ids) {
        if dtx.tx_type != TxType::Ticket {
            continue;
        }
        let Some(submission) = tx.outputs.first() else {
            continue;
        };
        let decoded = adapter.script_addresses(&submission.pk_script);
        let row = TicketRow {
            tx_hash: dtx.row.tx_hash.clone(),
            block_hash: ctx.block_hash.to_string(),
            block_height: ctx.height,
            purchase_tx_db_id: *tx_id,
            stakesubmission_address: decoded.addresses.first().cloned().unwrap_or_default(),
            is_multisig: decoded.is_script_hash,
            is_split: tx.inputs.len() > 1,
            num_inputs: tx.inputs.len() as i64,
            price: adapter.to_coin(submission.value),
            fee: adapter.to_coin(dtx.row.fees),
            spend_type: SpendType::Unspent,
            pool_status: PoolStatus::Live,
            is_mainchain: ctx.is_mainchain,
        };
        let id = stake::insert_ticket(conn, &row, mode)?;
        inserted.push((row.tx_hash, id));
    }
    Ok(inserted)
}

/// Inserts vote rows with their agenda and treasury-spend choices, then a
/// miss for every winning ticket that did not vote.
#[allow(clippy::too_many_arguments)]
pub fn insert_votes_and_misses(
    conn: &Connection,
    ctx: &StakeContext<'_>,
    txs: &[Transaction],
    tree: &DecomposedTree,
    tx_ids: &[i64],
    adapter: &dyn ChainAdapter,
    tickets: &TicketIdCache,
    mode: InsertMode,
) -> Result<VoteBatch, StoreError> {
    let params = adapter.params();
    let mut batch = VoteBatch::default();
    let mut voted: HashSet<Hash256> = HashSet::new();

    for ((tx, dtx), tx_id) in txs.iter().zip(&tree.txs).zip(tx_ids) {
        if dtx.tx_type != TxType::Vote {
            continue;
        }
        let (Some(info), Some(ticket)) = (parse_vote(tx), spent_ticket(tx, TxType::Vote)) else {
            log_warn!("vote {} has no parsable payload", dtx.row.tx_hash);
            continue;
        };
        voted.insert(ticket);
        let ticket_hash = hash256_to_hex(&ticket);
        let ticket_id = tickets.lookup(conn, &ticket_hash, ctx.is_mainchain)?;
        if ticket_id.is_none() {
            log_warn!("vote {} spends unindexed ticket {ticket_hash}", dtx.row.tx_hash);
        }
        let ticket_value = tx.inputs.get(1).map_or(0, |input| input.value_in);

        let vote_id = stake::insert_vote(
            conn,
            &VoteRow {
                height: ctx.height,
                tx_hash: dtx.row.tx_hash.clone(),
                block_hash: ctx.block_hash.to_string(),
                candidate_block_hash: hash256_to_hex(&info.block_hash),
                version: info.version,
                vote_bits: info.vote_bits,
                block_valid: info.approves_block(),
                ticket_hash: ticket_hash.clone(),
                ticket_tx_db_id: ticket_id.unwrap_or(0),
                ticket_price: adapter.to_coin(ticket_value),
                vote_reward: adapter.to_coin(tx.total_out() - ticket_value),
                is_mainchain: ctx.is_mainchain,
                block_time: ctx.block_time,
            },
            mode,
        )?;
        batch.votes += 1;
        batch.agenda_votes += insert_agenda_votes(conn, params, vote_id, info.version, info.vote_bits, mode)?;

        for (tspend, choice) in &info.tspend_votes {
            stake::insert_tspend_vote(
                conn,
                &TSpendVoteRow {
                    votes_row_id: vote_id,
                    tspend_hash: hash256_to_hex(tspend),
                    choice: choice.code(),
                },
                mode,
            )?;
            batch.tspend_votes += 1;
        }

        if let Some(ticket_id) = ticket_id {
            batch.spends.push(StakeSpend {
                ticket_hash,
                ticket_id,
                spend_tx_id: *tx_id,
                kind: TxType::Vote,
            });
        }
    }

    for winner in &ctx.snapshot.winners {
        if voted.contains(winner) {
            continue;
        }
        let ticket_hash = hash256_to_hex(winner);
        stake::insert_miss(
            conn,
            &MissRow {
                height: ctx.height,
                block_hash: ctx.block_hash.to_string(),
                candidate_block_hash: ctx.parent_hash.to_string(),
                ticket_hash: ticket_hash.clone(),
            },
            mode,
        )?;
        batch.misses.push(ticket_hash);
    }
    Ok(batch)
}

fn insert_agenda_votes(
    conn: &Connection,
    params: &ChainParams,
    vote_id: i64,
    version: u32,
    vote_bits: u16,
    mode: InsertMode,
) -> Result<usize, StoreError> {
    let mut count = 0;
    for deployment in params.deployments_for_version(version) {
        let Some(choice) = deployment.choice_for(vote_bits) else {
            continue;
        };
        let Some(agenda_id) = stake::agenda_id(conn, deployment.id)? else {
            continue;
        };
        stake::insert_agenda_vote(
            conn,
            &AgendaVoteRow {
                votes_row_id: vote_id,
                agendas_row_id: agenda_id,
                choice: choice.kind.code(),
            },
            mode,
        )?;
        count += 1;
    }
    Ok(count)
}

/// Ticket spends made by the block's revocations.
pub fn collect_revocations(
    conn: &Connection,
    ctx: &StakeContext<'_>,
    txs: &[Transaction],
    tree: &DecomposedTree,
    tx_ids: &[i64],
    tickets: &TicketIdCache,
) -> Result<Vec<StakeSpend>, StoreError> {
    let mut spends = Vec::new();
    for ((tx, dtx), tx_id) in txs.iter().zip(&tree.txs).zip(tx_ids) {
        if dtx.tx_type != TxType::Revocation {
            continue;
        }
        let Some(ticket) = spent_ticket(tx, TxType::Revocation) else {
            continue;
        };
        let ticket_hash = hash256_to_hex(&ticket);
        match tickets.lookup(conn, &ticket_hash, ctx.is_mainchain)? {
            Some(ticket_id) => spends.push(StakeSpend {
                ticket_hash,
                ticket_id,
                spend_tx_id: *tx_id,
                kind: TxType::Revocation,
            }),
            None => log_warn!("revocation {} spends unindexed ticket {ticket_hash}", dtx.row.tx_hash),
        }
    }
    Ok(spends)
}

/// Records spend type, height and spending row on each spent ticket. Votes
/// leave the ticket voted. A revoked ticket is expired when the snapshot says
/// so or its expiry window has passed, and missed otherwise.
pub fn resolve_stake_spends(
    conn: &Connection,
    ctx: &StakeContext<'_>,
    params: &ChainParams,
    spends: &[StakeSpend],
) -> Result<usize, StoreError> {
    if !ctx.is_mainchain {
        return Ok(0);
    }
    let expired: HashSet<String> = ctx.snapshot.expired.iter().map(hash256_to_hex).collect();
    let expired_at_or_below = params.stake.expired_at_or_below(ctx.height);

    // Votes before revocations.
    let ordered = spends
        .iter()
        .filter(|spend| spend.kind == TxType::Vote)
        .chain(spends.iter().filter(|spend| spend.kind == TxType::Revocation));
    let mut updated = 0;
    for spend in ordered {
        let (spend_type, pool_status) = match spend.kind {
            TxType::Vote => (SpendType::Voted, PoolStatus::Voted),
            _ => {
                let purchase_height = stake::ticket_by_hash(conn, &spend.ticket_hash)?
                    .map_or(i64::MAX, |ticket| ticket.block_height);
                let status = if expired.contains(&spend.ticket_hash)
                    || purchase_height <= expired_at_or_below
                {
                    PoolStatus::Expired
                } else {
                    PoolStatus::Missed
                };
                (SpendType::Revoked, status)
            }
        };
        stake::set_ticket_spending(
            conn,
            spend.ticket_id,
            spend_type,
            pool_status,
            ctx.height,
            spend.spend_tx_id,
        )?;
        updated += 1;
    }
    Ok(updated)
}

/// Moves unspent tickets out of the live pool: snapshot misses and this
/// block's misses become missed, snapshot expirations and tickets past their
/// expiry window become expired.
pub fn sweep_pool_status(
    conn: &Connection,
    ctx: &StakeContext<'_>,
    params: &ChainParams,
    block_misses: &[String],
) -> Result<SweepCounts, StoreError> {
    if !ctx.is_mainchain {
        return Ok(SweepCounts::default());
    }
    let mut missed: Vec<String> = ctx.snapshot.missed.iter().map(hash256_to_hex).collect();
    missed.extend(block_misses.iter().cloned());
    missed.sort_unstable();
    missed.dedup();
    let expired: Vec<String> = ctx.snapshot.expired.iter().map(hash256_to_hex).collect();

    let mut counts = SweepCounts {
        missed: stake::set_pool_status_by_hashes(conn, &missed, PoolStatus::Missed)?,
        expired: stake::set_pool_status_by_hashes(conn, &expired, PoolStatus::Expired)?,
    };
    let window_expired =
        stake::expire_live_tickets(conn, params.stake.expired_at_or_below(ctx.height))?;
    counts.expired += window_expired.len();
    if counts.missed + counts.expired > 0 {
        log_debug!(
            "height {}: {} tickets missed, {} expired",
            ctx.height,
            counts.missed,
            counts.expired
        );
    }
    Ok(counts)
}
