//! Transaction types and their prefix/witness serialization.

use chaindex_consensus::{Amount, Hash256};

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};
use crate::hash::sha256d;
use crate::outpoint::OutPoint;

const SER_FULL: u16 = 0;
const SER_PREFIX: u16 = 1;

/// Which of a block's two transaction trees a transaction lives in.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum TxTree {
    Regular = 0,
    Stake = 1,
}

impl TxTree {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(TxTree::Regular),
            1 => Some(TxTree::Stake),
            _ => None,
        }
    }

    pub fn from_i64(raw: i64) -> Option<Self> {
        u8::try_from(raw).ok().and_then(Self::from_u8)
    }

    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub sequence: u32,
    /// Value of the spent output, carried in the witness.
    pub value_in: Amount,
    pub block_height: u32,
    pub block_index: u32,
    pub signature_script: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub version: u16,
    pub pk_script: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: u16,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

impl Transaction {
    pub fn txid(&self) -> Hash256 {
        let mut encoder = Encoder::new();
        encoder.write_u16_le(self.version);
        encoder.write_u16_le(SER_PREFIX);
        self.encode_prefix(&mut encoder);
        sha256d(&encoder.into_inner())
    }

    pub fn serialized_size(&self) -> usize {
        let mut encoder = Encoder::new();
        self.consensus_encode(&mut encoder);
        encoder.len()
    }

    pub fn total_in(&self) -> Amount {
        self.inputs.iter().map(|input| input.value_in).sum()
    }

    pub fn total_out(&self) -> Amount {
        self.outputs.iter().map(|output| output.value).sum()
    }

    pub fn is_coinbase_like(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    fn encode_prefix(&self, encoder: &mut Encoder) {
        encoder.write_compact_size(self.inputs.len() as u64);
        for input in &self.inputs {
            input.prevout.consensus_encode(encoder);
            encoder.write_u32_le(input.sequence);
        }
        encoder.write_compact_size(self.outputs.len() as u64);
        for output in &self.outputs {
            encoder.write_i64_le(output.value);
            encoder.write_u16_le(output.version);
            encoder.write_var_bytes(&output.pk_script);
        }
        encoder.write_u32_le(self.lock_time);
        encoder.write_u32_le(self.expiry);
    }

    fn encode_witness(&self, encoder: &mut Encoder) {
        encoder.write_compact_size(self.inputs.len() as u64);
        for input in &self.inputs {
            encoder.write_i64_le(input.value_in);
            encoder.write_u32_le(input.block_height);
            encoder.write_u32_le(input.block_index);
            encoder.write_var_bytes(&input.signature_script);
        }
    }
}

impl Encodable for Transaction {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_u16_le(self.version);
        encoder.write_u16_le(SER_FULL);
        self.encode_prefix(encoder);
        self.encode_witness(encoder);
    }
}

impl Decodable for Transaction {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let version = decoder.read_u16_le()?;
        if decoder.read_u16_le()? != SER_FULL {
            return Err(DecodeError::InvalidData("only full serialization is supported"));
        }

        let input_count = decoder.read_count(41)?;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let prevout = OutPoint::consensus_decode(decoder)?;
            let sequence = decoder.read_u32_le()?;
            inputs.push(TxIn {
                prevout,
                sequence,
                value_in: 0,
                block_height: 0,
                block_index: 0,
                signature_script: Vec::new(),
            });
        }

        let output_count = decoder.read_count(11)?;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let value = decoder.read_i64_le()?;
            let version = decoder.read_u16_le()?;
            let pk_script = decoder.read_var_bytes()?;
            outputs.push(TxOut {
                value,
                version,
                pk_script,
            });
        }
        let lock_time = decoder.read_u32_le()?;
        let expiry = decoder.read_u32_le()?;

        let witness_count = decoder.read_count(17)?;
        if witness_count != inputs.len() {
            return Err(DecodeError::InvalidData("witness count does not match inputs"));
        }
        for input in &mut inputs {
            input.value_in = decoder.read_i64_le()?;
            input.block_height = decoder.read_u32_le()?;
            input.block_index = decoder.read_u32_le()?;
            input.signature_script = decoder.read_var_bytes()?;
        }

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
            expiry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{decode, encode};

    fn sample() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                prevout: OutPoint::new([7u8; 32], 1, TxTree::Regular),
                sequence: u32::MAX,
                value_in: 5_000,
                block_height: 10,
                block_index: 2,
                signature_script: vec![0x01, 0xaa],
            }],
            outputs: vec![TxOut {
                value: 4_000,
                version: 0,
                pk_script: vec![0x6a],
            }],
            lock_time: 0,
            expiry: 0,
        }
    }

    #[test]
    fn txid_ignores_witness() {
        let tx = sample();
        let mut resigned = tx.clone();
        resigned.inputs[0].signature_script = vec![0x02, 0xbb, 0xcc];
        resigned.inputs[0].value_in = 9_999;
        assert_eq!(tx.txid(), resigned.txid());

        let mut changed = tx.clone();
        changed.outputs[0].value = 3_999;
        assert_ne!(tx.txid(), changed.txid());
    }

    #[test]
    fn full_encoding_decodes() {
        let tx = sample();
        let bytes = encode(&tx);
        assert_eq!(bytes.len(), tx.serialized_size());
        let decoded: Transaction = decode(&bytes).expect("decode");
        assert_eq!(decoded, tx);
        assert_eq!(decoded.total_in() - decoded.total_out(), 1_000);
    }
}
