#![allow(dead_code)]

use chaindex_chainstate::{adapter_for, BlockInput, ChainAdapter, ChainDb, IndexerConfig, StakeSnapshot, StoreOutcome};
use chaindex_consensus::{hash256_to_hex, Hash256, Network};
use chaindex_primitives::{p2pkh_script, Block, BlockHeader, OutPoint, Transaction, TxIn, TxOut, TxTree};
use chaindex_script::opcodes::{OP_DATA_36, OP_RETURN, OP_SSGEN, OP_SSRTX, OP_SSTX};
use chaindex_script::standard::tagged_script;
use chaindex_storage::{Store, StoreOptions};

pub fn open_db() -> ChainDb {
    let store = Store::open_in_memory(StoreOptions::default()).expect("store");
    ChainDb::open(store, adapter_for(Network::Regtest, true), IndexerConfig::default()).expect("open")
}

pub fn input(prevout: OutPoint, value_in: i64) -> TxIn {
    TxIn {
        prevout,
        sequence: u32::MAX,
        value_in,
        block_height: 0,
        block_index: 0,
        signature_script: Vec::new(),
    }
}

pub fn out(value: i64, pk_script: Vec<u8>) -> TxOut {
    TxOut {
        value,
        version: 0,
        pk_script,
    }
}

pub fn pay(tag: u8, value: i64) -> TxOut {
    out(value, p2pkh_script(&[tag; 20]))
}

pub fn address(adapter: &dyn ChainAdapter, tag: u8) -> String {
    adapter
        .script_addresses(&p2pkh_script(&[tag; 20]))
        .addresses
        .first()
        .cloned()
        .expect("p2pkh address")
}

pub fn tx(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Transaction {
    Transaction {
        version: 1,
        inputs,
        outputs,
        lock_time: 0,
        expiry: 0,
    }
}

/// Coinbase paying each (tag, value). `lock_time` keeps ids distinct per height.
pub fn coinbase(height: u32, outputs: &[(u8, i64)]) -> Transaction {
    let total: i64 = outputs.iter().map(|(_, value)| value).sum();
    let mut coinbase = tx(
        vec![input(OutPoint::null(), total)],
        outputs.iter().map(|(tag, value)| pay(*tag, *value)).collect(),
    );
    coinbase.lock_time = height;
    coinbase
}

pub fn ticket(funding: OutPoint, value_in: i64, price: i64, tag: u8) -> Transaction {
    tx(
        vec![input(funding, value_in)],
        vec![out(price, tagged_script(OP_SSTX, &p2pkh_script(&[tag; 20])))],
    )
}

/// A vote on `candidate` at `candidate_height` spending `ticket`.
pub fn vote(
    ticket: Hash256,
    ticket_value: i64,
    candidate: Hash256,
    candidate_height: u32,
    vote_bits: u16,
    version: u32,
    tag: u8,
) -> Transaction {
    let mut block_ref = vec![OP_RETURN, OP_DATA_36];
    block_ref.extend_from_slice(&candidate);
    block_ref.extend_from_slice(&candidate_height.to_le_bytes());
    let mut bits = vec![OP_RETURN, 0x06];
    bits.extend_from_slice(&vote_bits.to_le_bytes());
    bits.extend_from_slice(&version.to_le_bytes());
    let reward = 5_000;
    tx(
        vec![
            input(OutPoint::null(), reward),
            input(OutPoint::new(ticket, 0, TxTree::Stake), ticket_value),
        ],
        vec![
            out(0, block_ref),
            out(0, bits),
            out(
                ticket_value + reward,
                tagged_script(OP_SSGEN, &p2pkh_script(&[tag; 20])),
            ),
        ],
    )
}

/// A revocation returning `ticket`'s value to `tag`.
pub fn revocation(ticket: Hash256, ticket_value: i64, tag: u8) -> Transaction {
    tx(
        vec![input(OutPoint::new(ticket, 0, TxTree::Stake), ticket_value)],
        vec![out(ticket_value, tagged_script(OP_SSRTX, &p2pkh_script(&[tag; 20])))],
    )
}

pub fn block(prev: Hash256, height: u32, regular: Vec<Transaction>, stake: Vec<Transaction>) -> Block {
    Block {
        header: BlockHeader {
            version: 10,
            prev_block: prev,
            merkle_root: [0u8; 32],
            stake_root: [0u8; 32],
            vote_bits: 0x0001,
            final_state: [0u8; 6],
            voters: stake.len() as u16,
            fresh_stake: 0,
            revocations: 0,
            pool_size: 0,
            bits: 0x207f_ffff,
            sbits: 20_000,
            height,
            size: 0,
            timestamp: 1_700_000_000 + height * 300,
            nonce: 0,
            extra_data: [0u8; 32],
            stake_version: 10,
        },
        transactions: regular,
        stake_transactions: stake,
    }
}

/// Connects coinbase-only blocks on top of `prev` up to and including `to`.
pub fn connect_empty(db: &ChainDb, prev: &Block, to: u32) -> Block {
    let mut tip = prev.clone();
    for height in prev.header.height + 1..=to {
        tip = block(tip.hash(), height, vec![coinbase(height, &[(0xe0, 1_000)])], Vec::new());
        connect(db, &tip);
    }
    tip
}

pub fn hex(hash: &Hash256) -> String {
    hash256_to_hex(hash)
}

pub fn connect(db: &ChainDb, block: &Block) -> StoreOutcome {
    connect_with(db, block, &StakeSnapshot::default())
}

pub fn connect_with(db: &ChainDb, block: &Block, snapshot: &StakeSnapshot) -> StoreOutcome {
    db.connect_block(&BlockInput {
        block,
        snapshot,
        chainwork: "00",
    }, false)
    .expect("connect block")
}
