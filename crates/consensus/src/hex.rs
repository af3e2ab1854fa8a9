//! Hex helpers. Hashes are displayed byte-reversed, the way block explorers show them.

use std::fmt;

use crate::Hash256;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HexError {
    InvalidLength,
    InvalidHex,
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HexError::InvalidLength => write!(f, "invalid hex length"),
            HexError::InvalidHex => write!(f, "invalid hex character"),
        }
    }
}

impl std::error::Error for HexError {}

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(DIGITS[(byte >> 4) as usize] as char);
        out.push(DIGITS[(byte & 0x0f) as usize] as char);
    }
    out
}

pub fn bytes_from_hex(input: &str) -> Result<Vec<u8>, HexError> {
    let mut hex = input.trim();
    if let Some(stripped) = hex.strip_prefix("0x").or_else(|| hex.strip_prefix("0X")) {
        hex = stripped;
    }
    if hex.len() % 2 == 1 {
        return Err(HexError::InvalidLength);
    }
    let raw = hex.as_bytes();
    let mut out = Vec::with_capacity(raw.len() / 2);
    for pair in raw.chunks_exact(2) {
        let hi = nibble(pair[0]).ok_or(HexError::InvalidHex)?;
        let lo = nibble(pair[1]).ok_or(HexError::InvalidHex)?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

pub fn hash256_to_hex(hash: &Hash256) -> String {
    let mut reversed = *hash;
    reversed.reverse();
    bytes_to_hex(&reversed)
}

pub fn hash256_from_hex(input: &str) -> Result<Hash256, HexError> {
    let bytes = bytes_from_hex(input)?;
    let mut hash: Hash256 = bytes
        .as_slice()
        .try_into()
        .map_err(|_| HexError::InvalidLength)?;
    hash.reverse();
    Ok(hash)
}

fn nibble(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_hex_is_byte_reversed() {
        let mut hash = [0u8; 32];
        hash[0] = 0xab;
        hash[31] = 0x01;
        let text = hash256_to_hex(&hash);
        assert!(text.starts_with("01"));
        assert!(text.ends_with("ab"));
        assert_eq!(hash256_from_hex(&text).expect("parse"), hash);
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(bytes_from_hex("abc"), Err(HexError::InvalidLength));
        assert_eq!(bytes_from_hex("zz"), Err(HexError::InvalidHex));
        assert_eq!(hash256_from_hex("00ff"), Err(HexError::InvalidLength));
        assert_eq!(bytes_from_hex("0xDEAD").expect("prefixed"), vec![0xde, 0xad]);
    }
}
