//! Base58check addresses over pubkey-hash and script-hash payloads.

use std::fmt;

use chaindex_consensus::ChainParams;

use crate::hash::sha256d;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AddressError {
    InvalidLength,
    InvalidCharacter,
    InvalidChecksum,
    UnknownPrefix,
}

impl fmt::Display for AddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressError::InvalidLength => write!(f, "invalid address length"),
            AddressError::InvalidCharacter => write!(f, "invalid base58 character"),
            AddressError::InvalidChecksum => write!(f, "address checksum mismatch"),
            AddressError::UnknownPrefix => write!(f, "address prefix not valid for this network"),
        }
    }
}

impl std::error::Error for AddressError {}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum AddressKind {
    PubKeyHash([u8; 20]),
    ScriptHash([u8; 20]),
}

pub fn encode_address(prefix: [u8; 2], hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(22);
    payload.extend_from_slice(&prefix);
    payload.extend_from_slice(hash);
    base58check_encode(&payload)
}

pub fn decode_address(address: &str, params: &ChainParams) -> Result<AddressKind, AddressError> {
    let payload = base58check_decode(address)?;
    if payload.len() != 22 {
        return Err(AddressError::InvalidLength);
    }
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&payload[2..]);
    let prefix = [payload[0], payload[1]];
    if prefix == params.pubkey_hash_prefix {
        Ok(AddressKind::PubKeyHash(hash))
    } else if prefix == params.script_hash_prefix {
        Ok(AddressKind::ScriptHash(hash))
    } else {
        Err(AddressError::UnknownPrefix)
    }
}

pub fn p2pkh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.extend_from_slice(&[0x76, 0xa9, 0x14]);
    script.extend_from_slice(hash);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

pub fn p2sh_script(hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(23);
    script.extend_from_slice(&[0xa9, 0x14]);
    script.extend_from_slice(hash);
    script.push(0x87);
    script
}

fn base58check_encode(payload: &[u8]) -> String {
    let checksum = sha256d(payload);
    let mut data = payload.to_vec();
    data.extend_from_slice(&checksum[..4]);
    base58_encode(&data)
}

fn base58check_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    let mut bytes = base58_decode(input)?;
    if bytes.len() < 5 {
        return Err(AddressError::InvalidLength);
    }
    let checksum = bytes.split_off(bytes.len() - 4);
    if checksum[..] != sha256d(&bytes)[..4] {
        return Err(AddressError::InvalidChecksum);
    }
    Ok(bytes)
}

fn base58_encode(data: &[u8]) -> String {
    let zeros = data.iter().take_while(|byte| **byte == 0).count();
    // Little-endian base-58 digits.
    let mut digits: Vec<u8> = Vec::with_capacity(data.len() * 138 / 100 + 1);
    for byte in &data[zeros..] {
        let mut carry = u32::from(*byte);
        for digit in &mut digits {
            carry += u32::from(*digit) << 8;
            *digit = (carry % 58) as u8;
            carry /= 58;
        }
        while carry > 0 {
            digits.push((carry % 58) as u8);
            carry /= 58;
        }
    }
    let mut out = String::with_capacity(zeros + digits.len());
    out.extend(std::iter::repeat('1').take(zeros));
    out.extend(digits.iter().rev().map(|digit| ALPHABET[*digit as usize] as char));
    out
}

fn base58_decode(input: &str) -> Result<Vec<u8>, AddressError> {
    if input.is_empty() {
        return Err(AddressError::InvalidLength);
    }
    let zeros = input.bytes().take_while(|ch| *ch == b'1').count();
    // Little-endian base-256 bytes.
    let mut bytes: Vec<u8> = Vec::with_capacity(input.len());
    for ch in input.bytes().skip(zeros) {
        let mut carry = ALPHABET
            .iter()
            .position(|value| *value == ch)
            .ok_or(AddressError::InvalidCharacter)? as u32;
        for byte in &mut bytes {
            carry += u32::from(*byte) * 58;
            *byte = (carry & 0xff) as u8;
            carry >>= 8;
        }
        while carry > 0 {
            bytes.push((carry & 0xff) as u8);
            carry >>= 8;
        }
    }
    let mut out = vec![0u8; zeros];
    out.extend(bytes.iter().rev());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaindex_consensus::{chain_params, Network};

    #[test]
    fn encode_then_decode_by_network() {
        let params = chain_params(Network::Mainnet);
        let hash = [0x42u8; 20];
        let pkh = encode_address(params.pubkey_hash_prefix, &hash);
        let sh = encode_address(params.script_hash_prefix, &hash);
        assert_ne!(pkh, sh);
        assert_eq!(decode_address(&pkh, &params), Ok(AddressKind::PubKeyHash(hash)));
        assert_eq!(decode_address(&sh, &params), Ok(AddressKind::ScriptHash(hash)));

        let testnet = chain_params(Network::Testnet);
        assert_eq!(decode_address(&pkh, &testnet), Err(AddressError::UnknownPrefix));
    }

    #[test]
    fn leading_zero_bytes_become_ones() {
        assert_eq!(base58_encode(&[0, 0, 1]), "112");
        assert_eq!(base58_decode("112").expect("decode"), vec![0, 0, 1]);
    }

    #[test]
    fn detects_corruption() {
        let params = chain_params(Network::Mainnet);
        let mut addr = encode_address(params.pubkey_hash_prefix, &[7u8; 20]);
        let last = addr.pop().expect("non-empty");
        addr.push(if last == 'z' { 'y' } else { 'z' });
        assert!(matches!(
            decode_address(&addr, &params),
            Err(AddressError::InvalidChecksum) | Err(AddressError::InvalidLength)
        ));
        assert_eq!(
            decode_address("0OIl", &params),
            Err(AddressError::InvalidCharacter)
        );
    }
}
