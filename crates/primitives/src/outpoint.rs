//! Reference to a previous transaction output.

use chaindex_consensus::{hash256_to_hex, Hash256};

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::transaction::TxTree;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
    pub tree: TxTree,
}

impl OutPoint {
    pub fn new(hash: Hash256, index: u32, tree: TxTree) -> Self {
        Self { hash, index, tree }
    }

    /// The outpoint of coinbase, stakebase and treasury-base inputs.
    pub fn null() -> Self {
        Self {
            hash: [0u8; 32],
            index: u32::MAX,
            tree: TxTree::Regular,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash == [0u8; 32]
    }
}

impl std::fmt::Display for OutPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", hash256_to_hex(&self.hash), self.index)
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.hash);
        encoder.write_u32_le(self.index);
        encoder.write_u8(self.tree as u8);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash()?;
        let index = decoder.read_u32_le()?;
        let tree = TxTree::from_u8(decoder.read_u8()?)
            .ok_or(DecodeError::InvalidData("invalid outpoint tree"))?;
        Ok(Self { hash, index, tree })
    }
}
