//! Splits one transaction tree of a block into the rows the writer inserts.

use std::collections::HashMap;

use chaindex_consensus::constants::MIX_MIN_PARTICIPANTS;
use chaindex_consensus::{hash256_from_hex, hash256_to_hex, Hash256};
use chaindex_primitives::{Block, OutPoint, Transaction, TxTree};
use chaindex_script::TxType;
use chaindex_storage::{RowIds, TreasuryRow, TxRow, VinRow, VoutRow};

use crate::adapter::ChainAdapter;

#[derive(Clone, Debug)]
pub struct DecomposedTx {
    pub txid: Hash256,
    pub tx_type: TxType,
    pub row: TxRow,
    pub vins: Vec<VinRow>,
    pub vouts: Vec<VoutRow>,
}

impl DecomposedTx {
    pub fn is_valid_mainchain(&self) -> bool {
        self.row.is_valid && self.row.is_mainchain
    }
}

#[derive(Clone, Debug)]
pub struct DecomposedTree {
    pub tree: TxTree,
    pub txs: Vec<DecomposedTx>,
}

impl DecomposedTree {
    pub fn num_vins(&self) -> usize {
        self.txs.iter().map(|tx| tx.vins.len()).sum()
    }

    pub fn num_vouts(&self) -> usize {
        self.txs.iter().map(|tx| tx.vouts.len()).sum()
    }

    /// Value of outputs this tree creates that are flagged mixed.
    pub fn mixed_value(&self) -> i64 {
        self.txs
            .iter()
            .flat_map(|tx| tx.vouts.iter())
            .filter(|vout| vout.mixed)
            .map(|vout| vout.value)
            .sum()
    }
}

/// Denomination and participant count of a mixing transaction: the most
/// common output value when at least `MIX_MIN_PARTICIPANTS` outputs share it.
/// Ties go to the larger value.
pub fn mix_denomination(tx: &Transaction) -> Option<(i64, i64)> {
    let mut counts: HashMap<i64, i64> = HashMap::new();
    for output in tx.outputs.iter().filter(|output| output.value > 0) {
        *counts.entry(output.value).or_default() += 1;
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count >= MIX_MIN_PARTICIPANTS as i64)
        .max_by_key(|(value, count)| (*count, *value))
}

fn has_no_fee(tx: &Transaction, tx_type: TxType) -> bool {
    tx.is_coinbase_like()
        || matches!(
            tx_type,
            TxType::Vote | TxType::TreasuryBase | TxType::TreasurySpend
        )
}

/// Builds transaction, input and output rows for one tree. Row id arrays are
/// left empty for the writer to fill.
///
/// The stake tree is never invalidated by a disapproving vote, so its rows
/// are always stored valid.
pub fn decompose_tree(
    block: &Block,
    tree: TxTree,
    adapter: &dyn ChainAdapter,
    is_valid: bool,
    is_mainchain: bool,
) -> DecomposedTree {
    let block_hash = hash256_to_hex(&block.hash());
    let block_time = i64::from(block.header.timestamp);
    let is_valid = is_valid || tree == TxTree::Stake;
    let txs = block
        .tree(tree)
        .iter()
        .enumerate()
        .map(|(block_index, tx)| {
            let txid = tx.txid();
            let tx_hash = hash256_to_hex(&txid);
            let tx_type = adapter.tx_type(tx, tree);
            let mix = if tree == TxTree::Regular {
                mix_denomination(tx)
            } else {
                None
            };

            let vouts = tx
                .outputs
                .iter()
                .enumerate()
                .map(|(index, output)| {
                    let decoded = adapter.script_addresses(&output.pk_script);
                    VoutRow {
                        tx_hash: tx_hash.clone(),
                        tx_index: index as u32,
                        tx_tree: tree.as_i16(),
                        value: output.value,
                        version: output.version,
                        pk_script: output.pk_script.clone(),
                        script_req_sigs: decoded.required_sigs,
                        script_type: decoded.class.as_str().to_string(),
                        script_addresses: decoded.addresses,
                        mixed: mix.is_some_and(|(denom, _)| output.value == denom),
                    }
                })
                .collect();

            let vins = tx
                .inputs
                .iter()
                .enumerate()
                .map(|(index, input)| {
                    let prevout = if input.prevout.is_null() {
                        OutPoint::new([0u8; 32], input.prevout.index, input.prevout.tree)
                    } else {
                        input.prevout
                    };
                    VinRow {
                        tx_hash: tx_hash.clone(),
                        tx_index: index as u32,
                        tx_tree: tree.as_i16(),
                        is_valid,
                        is_mainchain,
                        block_time,
                        prev_tx_hash: hash256_to_hex(&prevout.hash),
                        prev_tx_index: prevout.index,
                        prev_tx_tree: prevout.tree.as_i16(),
                        value_in: input.value_in,
                        tx_type: tx_type.code(),
                    }
                })
                .collect();

            let spent = tx.total_in();
            let sent = tx.total_out();
            let fees = if has_no_fee(tx, tx_type) {
                0
            } else {
                (spent - sent).max(0)
            };
            let (mix_denom, mix_count) = mix.unwrap_or((0, 0));

            DecomposedTx {
                txid,
                tx_type,
                row: TxRow {
                    block_hash: block_hash.clone(),
                    block_height: block.height(),
                    block_time,
                    tx_type: tx_type.code(),
                    version: tx.version,
                    tree: tree.as_i16(),
                    tx_hash,
                    block_index: block_index as u32,
                    lock_time: tx.lock_time,
                    expiry: tx.expiry,
                    size: tx.serialized_size() as i64,
                    spent,
                    sent,
                    fees,
                    mix_count,
                    mix_denom,
                    vin_db_ids: RowIds::new(),
                    vout_db_ids: RowIds::new(),
                    is_valid,
                    is_mainchain,
                },
                vins,
                vouts,
            }
        })
        .collect();
    DecomposedTree { tree, txs }
}

/// Flags the outputs of stake transactions whose every input spends a mixed
/// output. Outputs created earlier in the same block are resolved from the
/// batch; anything else goes through `lookup`.
pub fn propagate_stake_mixed<E>(
    stake: &mut DecomposedTree,
    regular: &DecomposedTree,
    mut lookup: impl FnMut(&Hash256, u32, TxTree) -> Result<Option<bool>, E>,
) -> Result<(), E> {
    let mut batch: HashMap<(Hash256, u32, i16), bool> = HashMap::new();
    for tx in &regular.txs {
        for vout in &tx.vouts {
            batch.insert((tx.txid, vout.tx_index, vout.tx_tree), vout.mixed);
        }
    }

    for tx in stake.txs.iter_mut() {
        let mut funded = 0usize;
        let mut all_mixed = true;
        for vin in &tx.vins {
            if vin.prev_tx_index == u32::MAX {
                continue;
            }
            funded += 1;
            let Ok(hash) = hash256_from_hex(&vin.prev_tx_hash) else {
                all_mixed = false;
                break;
            };
            let tree = TxTree::from_i64(i64::from(vin.prev_tx_tree)).unwrap_or(TxTree::Regular);
            let mixed = match batch.get(&(hash, vin.prev_tx_index, tree.as_i16())) {
                Some(mixed) => *mixed,
                None => lookup(&hash, vin.prev_tx_index, tree)?.unwrap_or(false),
            };
            if !mixed {
                all_mixed = false;
                break;
            }
        }
        let mixed = funded > 0 && all_mixed;
        for vout in tx.vouts.iter_mut() {
            vout.mixed = mixed;
            batch.insert((tx.txid, vout.tx_index, vout.tx_tree), mixed);
        }
    }
    Ok(())
}

pub fn tree_fees(tree: &DecomposedTree) -> i64 {
    tree.txs.iter().map(|tx| tx.row.fees).sum()
}

/// Treasury balance changes from the stake tree. Adds and the treasury base
/// credit their first output; spends debit everything paid out after the
/// first output.
pub fn treasury_rows(block: &Block, tree: &DecomposedTree) -> Vec<TreasuryRow> {
    let txs = block.tree(tree.tree);
    tree.txs
        .iter()
        .zip(txs)
        .filter(|(dtx, _)| dtx.tx_type.is_treasury())
        .map(|(dtx, tx)| {
            let value = match dtx.tx_type {
                TxType::TreasurySpend => -tx.outputs.iter().skip(1).map(|out| out.value).sum::<i64>(),
                _ => tx.outputs.first().map_or(0, |out| out.value),
            };
            TreasuryRow {
                tx_hash: dtx.row.tx_hash.clone(),
                tx_type: dtx.tx_type.code(),
                value,
                block_hash: dtx.row.block_hash.clone(),
                block_height: dtx.row.block_height,
                block_time: dtx.row.block_time,
                is_mainchain: dtx.row.is_mainchain,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::adapter_for;
    use chaindex_consensus::Network;
    use chaindex_primitives::{p2pkh_script, BlockHeader, TxIn, TxOut};

    fn input(hash: Hash256, index: u32, value_in: i64) -> TxIn {
        TxIn {
            prevout: OutPoint::new(hash, index, TxTree::Regular),
            sequence: u32::MAX,
            value_in,
            block_height: 0,
            block_index: 0,
            signature_script: Vec::new(),
        }
    }

    fn output(value: i64, tag: u8) -> TxOut {
        TxOut {
            value,
            version: 0,
            pk_script: p2pkh_script(&[tag; 20]),
        }
    }

    fn tx(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
            expiry: 0,
        }
    }

    fn block(transactions: Vec<Transaction>) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_block: [0; 32],
                merkle_root: [0; 32],
                stake_root: [0; 32],
                vote_bits: 1,
                final_state: [0; 6],
                voters: 0,
                fresh_stake: 0,
                revocations: 0,
                pool_size: 0,
                bits: 0x207f_ffff,
                sbits: 0,
                height: 7,
                size: 0,
                timestamp: 1_700_000_000,
                nonce: 0,
                extra_data: [0; 32],
                stake_version: 0,
            },
            transactions,
            stake_transactions: Vec::new(),
        }
    }

    #[test]
    fn fees_and_addresses() {
        let adapter = adapter_for(Network::Regtest, true);
        let coinbase = tx(
            vec![TxIn {
                prevout: OutPoint::null(),
                ..input([0; 32], 0, 500)
            }],
            vec![output(500, 1)],
        );
        let spend = tx(vec![input([9; 32], 0, 1_000)], vec![output(600, 2), output(300, 3)]);
        let block = block(vec![coinbase, spend]);

        let tree = decompose_tree(&block, TxTree::Regular, adapter.as_ref(), false, true);
        assert_eq!(tree.txs.len(), 2);
        assert_eq!(tree.txs[0].row.fees, 0);
        assert_eq!(tree.txs[0].vins[0].prev_tx_hash, "00".repeat(32));
        assert_eq!(tree.txs[1].row.fees, 100);
        assert_eq!(tree_fees(&tree), 100);
        assert!(!tree.txs[1].row.is_valid);
        assert_eq!(tree.txs[1].row.block_index, 1);
        assert_eq!(tree.txs[1].vouts[0].script_addresses.len(), 1);
        assert_eq!(tree.txs[1].vouts[0].script_type, "pubkeyhash");
        assert_eq!(tree.num_vins(), 2);
        assert_eq!(tree.num_vouts(), 3);
    }

    #[test]
    fn mix_outputs_are_flagged() {
        let mix = tx(
            vec![input([1; 32], 0, 400), input([2; 32], 0, 400), input([3; 32], 0, 400)],
            vec![output(300, 1), output(300, 2), output(300, 3), output(250, 4)],
        );
        assert_eq!(mix_denomination(&mix), Some((300, 3)));

        let adapter = adapter_for(Network::Regtest, true);
        let tree = decompose_tree(&block(vec![mix]), TxTree::Regular, adapter.as_ref(), true, true);
        let flags: Vec<bool> = tree.txs[0].vouts.iter().map(|vout| vout.mixed).collect();
        assert_eq!(flags, vec![true, true, true, false]);
        assert_eq!(tree.txs[0].row.mix_count, 3);
        assert_eq!(tree.mixed_value(), 900);
    }

    #[test]
    fn stake_outputs_need_every_input_mixed() {
        let adapter = adapter_for(Network::Regtest, true);
        let mut block = block(Vec::new());
        block.stake_transactions = vec![
            tx(vec![input([1; 32], 0, 10), input([2; 32], 0, 10)], vec![output(20, 1)]),
            tx(vec![input([1; 32], 1, 10), input([3; 32], 0, 10)], vec![output(20, 2)]),
        ];
        let regular = decompose_tree(&block, TxTree::Regular, adapter.as_ref(), true, true);
        let mut stake = decompose_tree(&block, TxTree::Stake, adapter.as_ref(), true, true);

        let mixed_outputs = [([1u8; 32], 0u32), ([2; 32], 0), ([1; 32], 1)];
        propagate_stake_mixed(&mut stake, &regular, |hash, index, _| {
            Ok::<_, ()>(Some(mixed_outputs.contains(&(*hash, index))))
        })
        .expect("lookup");
        assert!(stake.txs[0].vouts[0].mixed);
        assert!(!stake.txs[1].vouts[0].mixed);
    }
}
