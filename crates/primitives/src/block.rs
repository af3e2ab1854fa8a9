//! Block header and block types.

use chaindex_consensus::constants::VOTE_BITS_APPROVE_PARENT;
use chaindex_consensus::Hash256;

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::transaction::{Transaction, TxTree};

pub const HEADER_SIZE: usize = 180;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block: Hash256,
    pub merkle_root: Hash256,
    pub stake_root: Hash256,
    pub vote_bits: u16,
    pub final_state: [u8; 6],
    pub voters: u16,
    pub fresh_stake: u8,
    pub revocations: u8,
    pub pool_size: u32,
    pub bits: u32,
    pub sbits: i64,
    pub height: u32,
    pub size: u32,
    pub timestamp: u32,
    pub nonce: u32,
    pub extra_data: [u8; 32],
    pub stake_version: u32,
}

impl BlockHeader {
    pub fn hash(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        self.consensus_encode(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    /// Whether this block's voters approved the parent's regular tree.
    pub fn approves_parent(&self) -> bool {
        self.vote_bits & VOTE_BITS_APPROVE_PARENT != 0
    }
}

impl Encodable for BlockHeader {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_i32_le(self.version);
        encoder.write_hash(&self.prev_block);
        encoder.write_hash(&self.merkle_root);
        encoder.write_hash(&self.stake_root);
        encoder.write_u16_le(self.vote_bits);
        encoder.write_bytes(&self.final_state);
        encoder.write_u16_le(self.voters);
        encoder.write_u8(self.fresh_stake);
        encoder.write_u8(self.revocations);
        encoder.write_u32_le(self.pool_size);
        encoder.write_u32_le(self.bits);
        encoder.write_i64_le(self.sbits);
        encoder.write_u32_le(self.height);
        encoder.write_u32_le(self.size);
        encoder.write_u32_le(self.timestamp);
        encoder.write_u32_le(self.nonce);
        encoder.write_bytes(&self.extra_data);
        encoder.write_u32_le(self.stake_version);
    }
}

impl Decodable for BlockHeader {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        Ok(Self {
            version: decoder.read_i32_le()?,
            prev_block: decoder.read_hash()?,
            merkle_root: decoder.read_hash()?,
            stake_root: decoder.read_hash()?,
            vote_bits: decoder.read_u16_le()?,
            final_state: decoder.read_fixed()?,
            voters: decoder.read_u16_le()?,
            fresh_stake: decoder.read_u8()?,
            revocations: decoder.read_u8()?,
            pool_size: decoder.read_u32_le()?,
            bits: decoder.read_u32_le()?,
            sbits: decoder.read_i64_le()?,
            height: decoder.read_u32_le()?,
            size: decoder.read_u32_le()?,
            timestamp: decoder.read_u32_le()?,
            nonce: decoder.read_u32_le()?,
            extra_data: decoder.read_fixed()?,
            stake_version: decoder.read_u32_le()?,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub stake_transactions: Vec<Transaction>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn height(&self) -> i64 {
        i64::from(self.header.height)
    }

    pub fn tree(&self, tree: TxTree) -> &[Transaction] {
        match tree {
            TxTree::Regular => &self.transactions,
            TxTree::Stake => &self.stake_transactions,
        }
    }

    pub fn serialized_size(&self) -> usize {
        let mut encoder = Encoder::new();
        self.consensus_encode(&mut encoder);
        encoder.len()
    }
}

impl Encodable for Block {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        self.header.consensus_encode(encoder);
        for tree in [&self.transactions, &self.stake_transactions] {
            encoder.write_compact_size(tree.len() as u64);
            for tx in tree {
                tx.consensus_encode(encoder);
            }
        }
    }
}

impl Decodable for Block {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let header = BlockHeader::consensus_decode(decoder)?;
        let mut trees = [Vec::new(), Vec::new()];
        for tree in &mut trees {
            let count = decoder.read_count(4)?;
            tree.reserve(count);
            for _ in 0..count {
                tree.push(Transaction::consensus_decode(decoder)?);
            }
        }
        let [transactions, stake_transactions] = trees;
        Ok(Self {
            header,
            transactions,
            stake_transactions,
        })
    }
}
