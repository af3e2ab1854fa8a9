//! Per-chain capabilities the engine is parameterized by.

use std::sync::Arc;

use chaindex_consensus::{chain_params, ChainParams, Network, COIN};
use chaindex_primitives::{Transaction, TxTree};
use chaindex_script::{classify_transaction, extract_addresses, ScriptAddresses, TxType};

pub trait ChainAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn params(&self) -> &ChainParams;

    /// Whether blocks carry a stake tree at all.
    fn has_stake_tree(&self) -> bool;

    fn trees(&self) -> &'static [TxTree] {
        if self.has_stake_tree() {
            &[TxTree::Regular, TxTree::Stake]
        } else {
            &[TxTree::Regular]
        }
    }

    /// Atoms per coin.
    fn amount_scale(&self) -> i64 {
        COIN
    }

    fn to_coin(&self, atoms: i64) -> f64 {
        atoms as f64 / self.amount_scale() as f64
    }

    fn script_addresses(&self, script: &[u8]) -> ScriptAddresses {
        extract_addresses(script, self.params())
    }

    fn tx_type(&self, tx: &Transaction, tree: TxTree) -> TxType;
}

/// Chains with tickets, votes and a treasury.
pub struct StakeChainAdapter {
    params: ChainParams,
}

impl StakeChainAdapter {
    pub fn new(params: ChainParams) -> Self {
        Self { params }
    }
}

impl ChainAdapter for StakeChainAdapter {
    fn name(&self) -> &'static str {
        "stake"
    }

    fn params(&self) -> &ChainParams {
        &self.params
    }

    fn has_stake_tree(&self) -> bool {
        true
    }

    fn tx_type(&self, tx: &Transaction, tree: TxTree) -> TxType {
        match tree {
            TxTree::Stake => classify_transaction(tx),
            TxTree::Regular => TxType::Regular,
        }
    }
}

/// Plain UTXO chains: only a regular tree, every transaction is regular.
pub struct PlainChainAdapter {
    params: ChainParams,
}

impl PlainChainAdapter {
    pub fn new(params: ChainParams) -> Self {
        Self { params }
    }
}

impl ChainAdapter for PlainChainAdapter {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn params(&self) -> &ChainParams {
        &self.params
    }

    fn has_stake_tree(&self) -> bool {
        false
    }

    fn tx_type(&self, _tx: &Transaction, _tree: TxTree) -> TxType {
        TxType::Regular
    }
}

pub fn adapter_for(network: Network, with_stake: bool) -> Arc<dyn ChainAdapter> {
    let params = chain_params(network);
    if with_stake {
        Arc::new(StakeChainAdapter::new(params))
    } else {
        Arc::new(PlainChainAdapter::new(params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_chain_has_one_tree() {
        let plain = adapter_for(Network::Regtest, false);
        assert_eq!(plain.trees(), &[TxTree::Regular]);
        let stake = adapter_for(Network::Regtest, true);
        assert_eq!(stake.trees().len(), 2);
        assert_eq!(stake.to_coin(COIN / 2), 0.5);
    }
}
