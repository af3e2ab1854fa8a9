//! Stake and treasury transaction typing, plus vote payload parsing.

use chaindex_consensus::constants::{
    MAX_TSPEND_VOTES_PER_VOTE, TREASURY_TX_VERSION, TSPEND_VOTE_MARKER,
};
use chaindex_consensus::Hash256;
use chaindex_primitives::Transaction;

use crate::opcodes::{OP_DATA_32, OP_DATA_36, OP_RETURN, OP_TADD, OP_TSPEND};
use crate::push::{instructions, Instruction};
use crate::standard::{classify_script, ScriptClass};

/// Transaction type as stored in the `tx_type` columns.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TxType {
    Regular,
    Ticket,
    Vote,
    Revocation,
    TreasuryAdd,
    TreasurySpend,
    TreasuryBase,
}

impl TxType {
    pub fn code(self) -> i16 {
        match self {
            TxType::Regular => 0,
            TxType::Ticket => 1,
            TxType::Vote => 2,
            TxType::Revocation => 3,
            TxType::TreasuryAdd => 4,
            TxType::TreasurySpend => 5,
            TxType::TreasuryBase => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            0 => TxType::Regular,
            1 => TxType::Ticket,
            2 => TxType::Vote,
            3 => TxType::Revocation,
            4 => TxType::TreasuryAdd,
            5 => TxType::TreasurySpend,
            6 => TxType::TreasuryBase,
            _ => return None,
        })
    }

    pub fn is_treasury(self) -> bool {
        matches!(
            self,
            TxType::TreasuryAdd | TxType::TreasurySpend | TxType::TreasuryBase
        )
    }
}

fn is_ticket(tx: &Transaction) -> bool {
    let Some(first) = tx.outputs.first() else {
        return false;
    };
    if tx.inputs.is_empty() || classify_script(&first.pk_script) != ScriptClass::StakeSubmission {
        return false;
    }
    // Commitment/change pairs follow the submission output.
    if tx.outputs.len() % 2 != 1 {
        return false;
    }
    tx.outputs[1..].chunks(2).all(|pair| {
        classify_script(&pair[0].pk_script) == ScriptClass::NullData
            && classify_script(&pair[1].pk_script) == ScriptClass::StakeSubChange
    })
}

fn is_vote(tx: &Transaction) -> bool {
    if tx.inputs.len() != 2 || !tx.inputs[0].prevout.is_null() || tx.outputs.len() < 3 {
        return false;
    }
    let block_ref = &tx.outputs[0].pk_script;
    if block_ref.len() != 38 || block_ref[0] != OP_RETURN || block_ref[1] != OP_DATA_36 {
        return false;
    }
    if vote_bits_payload(&tx.outputs[1].pk_script).is_none() {
        return false;
    }
    let rewards = &tx.outputs[2..];
    let rewards = match rewards.split_last() {
        Some((last, rest)) if tspend_payload(&last.pk_script).is_some() => rest,
        _ => rewards,
    };
    !rewards.is_empty()
        && rewards
            .iter()
            .all(|out| classify_script(&out.pk_script) == ScriptClass::StakeGen)
}

fn is_revocation(tx: &Transaction) -> bool {
    tx.inputs.len() == 1
        && !tx.inputs[0].prevout.is_null()
        && !tx.outputs.is_empty()
        && tx
            .outputs
            .iter()
            .all(|out| classify_script(&out.pk_script) == ScriptClass::StakeRevocation)
}

fn is_treasury_add(tx: &Transaction) -> bool {
    tx.version == TREASURY_TX_VERSION
        && !tx.inputs.is_empty()
        && !tx.inputs[0].prevout.is_null()
        && matches!(tx.outputs.len(), 1 | 2)
        && tx.outputs[0].pk_script == [OP_TADD]
        && tx.outputs[1..]
            .iter()
            .all(|out| classify_script(&out.pk_script) == ScriptClass::StakeSubChange)
}

fn is_treasury_spend(tx: &Transaction) -> bool {
    if tx.version != TREASURY_TX_VERSION
        || tx.inputs.len() != 1
        || !tx.inputs[0].prevout.is_null()
        || tx.outputs.len() < 2
    {
        return false;
    }
    if tx.inputs[0].signature_script.last() != Some(&OP_TSPEND) {
        return false;
    }
    let marker = &tx.outputs[0].pk_script;
    marker.len() == 34
        && marker[0] == OP_RETURN
        && marker[1] == OP_DATA_32
        && tx.outputs[1..]
            .iter()
            .all(|out| classify_script(&out.pk_script) == ScriptClass::TreasuryGen)
}

fn is_treasury_base(tx: &Transaction) -> bool {
    tx.version == TREASURY_TX_VERSION
        && tx.inputs.len() == 1
        && tx.inputs[0].prevout.is_null()
        && tx.outputs.len() == 2
        && tx.outputs[0].pk_script == [OP_TADD]
        && classify_script(&tx.outputs[1].pk_script) == ScriptClass::NullData
}

pub fn classify_transaction(tx: &Transaction) -> TxType {
    if is_ticket(tx) {
        TxType::Ticket
    } else if is_vote(tx) {
        TxType::Vote
    } else if is_revocation(tx) {
        TxType::Revocation
    } else if is_treasury_base(tx) {
        TxType::TreasuryBase
    } else if is_treasury_spend(tx) {
        TxType::TreasurySpend
    } else if is_treasury_add(tx) {
        TxType::TreasuryAdd
    } else {
        TxType::Regular
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TSpendChoice {
    Yes,
    No,
}

impl TSpendChoice {
    pub fn code(self) -> i16 {
        match self {
            TSpendChoice::Yes => 1,
            TSpendChoice::No => 2,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VoteInfo {
    pub block_hash: Hash256,
    pub block_height: u32,
    pub vote_bits: u16,
    pub version: u32,
    pub tspend_votes: Vec<(Hash256, TSpendChoice)>,
}

impl VoteInfo {
    pub fn approves_block(&self) -> bool {
        self.vote_bits & chaindex_consensus::constants::VOTE_BITS_APPROVE_PARENT != 0
    }
}

fn single_push(script: &[u8]) -> Option<&[u8]> {
    if script.first() != Some(&OP_RETURN) {
        return None;
    }
    match instructions(&script[1..]).ok()?.as_slice() {
        [Instruction::Push(data)] => Some(data),
        _ => None,
    }
}

fn vote_bits_payload(script: &[u8]) -> Option<(u16, u32)> {
    let data = single_push(script)?;
    if !(2..=77).contains(&data.len()) {
        return None;
    }
    let bits = u16::from_le_bytes([data[0], data[1]]);
    let version = data
        .get(2..6)
        .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
        .unwrap_or(0);
    Some((bits, version))
}

fn tspend_payload(script: &[u8]) -> Option<Vec<(Hash256, TSpendChoice)>> {
    let data = single_push(script)?;
    let body = data.strip_prefix(&TSPEND_VOTE_MARKER[..])?;
    if body.is_empty() || body.len() % 33 != 0 || body.len() / 33 > MAX_TSPEND_VOTES_PER_VOTE {
        return None;
    }
    body.chunks_exact(33)
        .map(|chunk| {
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&chunk[..32]);
            let choice = match chunk[32] {
                1 => TSpendChoice::Yes,
                2 => TSpendChoice::No,
                _ => return None,
            };
            Some((hash, choice))
        })
        .collect()
}

/// Extracts the voted-on block, vote bits and treasury-spend votes from a vote.
pub fn parse_vote(tx: &Transaction) -> Option<VoteInfo> {
    if !is_vote(tx) {
        return None;
    }
    let block_ref = &tx.outputs[0].pk_script[2..];
    let mut block_hash = [0u8; 32];
    block_hash.copy_from_slice(&block_ref[..32]);
    let block_height = u32::from_le_bytes([block_ref[32], block_ref[33], block_ref[34], block_ref[35]]);
    let (vote_bits, version) = vote_bits_payload(&tx.outputs[1].pk_script)?;
    let tspend_votes = tx
        .outputs
        .last()
        .and_then(|out| tspend_payload(&out.pk_script))
        .unwrap_or_default();
    Some(VoteInfo {
        block_hash,
        block_height,
        vote_bits,
        version,
        tspend_votes,
    })
}

/// Hash of the ticket a vote or revocation spends.
pub fn spent_ticket(tx: &Transaction, tx_type: TxType) -> Option<Hash256> {
    let input = match tx_type {
        TxType::Vote => tx.inputs.get(1)?,
        TxType::Revocation => tx.inputs.first()?,
        _ => return None,
    };
    Some(input.prevout.hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes::{OP_SSGEN, OP_SSRTX, OP_SSTX, OP_SSTXCHANGE};
    use crate::standard::tagged_script;
    use chaindex_primitives::{p2pkh_script, OutPoint, TxIn, TxOut, TxTree};

    fn input(prevout: OutPoint) -> TxIn {
        TxIn {
            prevout,
            sequence: u32::MAX,
            value_in: 0,
            block_height: 0,
            block_index: 0,
            signature_script: Vec::new(),
        }
    }

    fn out(value: i64, pk_script: Vec<u8>) -> TxOut {
        TxOut {
            value,
            version: 0,
            pk_script,
        }
    }

    fn vote_tx(ticket: [u8; 32], bits: u16, tspend: Option<Vec<u8>>) -> Transaction {
        let mut block_ref = vec![OP_RETURN, OP_DATA_36];
        block_ref.extend_from_slice(&[9u8; 32]);
        block_ref.extend_from_slice(&100u32.to_le_bytes());
        let mut bits_script = vec![OP_RETURN, 0x06];
        bits_script.extend_from_slice(&bits.to_le_bytes());
        bits_script.extend_from_slice(&10u32.to_le_bytes());
        let mut outputs = vec![
            out(0, block_ref),
            out(0, bits_script),
            out(10, tagged_script(OP_SSGEN, &p2pkh_script(&[1; 20]))),
        ];
        if let Some(payload) = tspend {
            let mut script = vec![OP_RETURN, payload.len() as u8];
            script.extend_from_slice(&payload);
            outputs.push(out(0, script));
        }
        Transaction {
            version: 1,
            inputs: vec![
                input(OutPoint::null()),
                input(OutPoint::new(ticket, 0, TxTree::Stake)),
            ],
            outputs,
            lock_time: 0,
            expiry: 0,
        }
    }

    #[test]
    fn ticket_with_commitment_pairs() {
        let tx = Transaction {
            version: 1,
            inputs: vec![input(OutPoint::new([1; 32], 0, TxTree::Regular))],
            outputs: vec![
                out(100, tagged_script(OP_SSTX, &p2pkh_script(&[2; 20]))),
                out(0, vec![OP_RETURN, 0x02, 0x00, 0x00]),
                out(0, tagged_script(OP_SSTXCHANGE, &p2pkh_script(&[3; 20]))),
            ],
            lock_time: 0,
            expiry: 0,
        };
        assert_eq!(classify_transaction(&tx), TxType::Ticket);
    }

    #[test]
    fn vote_parses_block_and_bits() {
        let tx = vote_tx([5; 32], 0x0005, None);
        assert_eq!(classify_transaction(&tx), TxType::Vote);
        let info = parse_vote(&tx).expect("vote");
        assert_eq!(info.block_hash, [9; 32]);
        assert_eq!(info.block_height, 100);
        assert_eq!(info.vote_bits, 0x0005);
        assert_eq!(info.version, 10);
        assert!(info.approves_block());
        assert!(info.tspend_votes.is_empty());
        assert_eq!(spent_ticket(&tx, TxType::Vote), Some([5; 32]));
    }

    #[test]
    fn vote_with_tspend_votes() {
        let mut payload = b"TV".to_vec();
        payload.extend_from_slice(&[7u8; 32]);
        payload.push(1);
        payload.extend_from_slice(&[8u8; 32]);
        payload.push(2);
        let tx = vote_tx([5; 32], 0x0000, Some(payload));
        let info = parse_vote(&tx).expect("vote");
        assert!(!info.approves_block());
        assert_eq!(
            info.tspend_votes,
            vec![([7; 32], TSpendChoice::Yes), ([8; 32], TSpendChoice::No)]
        );
    }

    #[test]
    fn revocation_spends_input_zero() {
        let tx = Transaction {
            version: 1,
            inputs: vec![input(OutPoint::new([4; 32], 0, TxTree::Stake))],
            outputs: vec![out(90, tagged_script(OP_SSRTX, &p2pkh_script(&[2; 20])))],
            lock_time: 0,
            expiry: 0,
        };
        assert_eq!(classify_transaction(&tx), TxType::Revocation);
        assert_eq!(spent_ticket(&tx, TxType::Revocation), Some([4; 32]));
    }

    #[test]
    fn treasury_base_and_add() {
        let base = Transaction {
            version: TREASURY_TX_VERSION,
            inputs: vec![input(OutPoint::null())],
            outputs: vec![out(500, vec![OP_TADD]), out(0, vec![OP_RETURN, 0x01, 0x00])],
            lock_time: 0,
            expiry: 0,
        };
        assert_eq!(classify_transaction(&base), TxType::TreasuryBase);

        let add = Transaction {
            version: TREASURY_TX_VERSION,
            inputs: vec![input(OutPoint::new([3; 32], 1, TxTree::Regular))],
            outputs: vec![out(500, vec![OP_TADD])],
            lock_time: 0,
            expiry: 0,
        };
        assert_eq!(classify_transaction(&add), TxType::TreasuryAdd);

        let mut plain = add.clone();
        plain.version = 1;
        assert_eq!(classify_transaction(&plain), TxType::Regular);
    }
}
