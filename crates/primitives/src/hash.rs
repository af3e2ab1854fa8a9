use chaindex_consensus::Hash256;
use ripemd::{Digest as _, Ripemd160};
use sha2::Sha256;

fn to_array<const N: usize>(digest: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&digest[..N]);
    out
}

pub fn sha256(data: &[u8]) -> Hash256 {
    to_array(&Sha256::digest(data))
}

/// Double SHA-256, used for block and transaction ids.
pub fn sha256d(data: &[u8]) -> Hash256 {
    to_array(&Sha256::digest(Sha256::digest(data)))
}

/// RIPEMD-160 of SHA-256, the 20-byte payload of pubkey-hash and script-hash addresses.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    to_array(&Ripemd160::digest(Sha256::digest(data)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vectors() {
        let empty = sha256(b"");
        assert_eq!(empty[0], 0xe3);
        assert_eq!(empty[31], 0x55);
        let h160 = hash160(b"");
        assert_eq!(h160[0], 0xb4);
        assert_eq!(h160[19], 0xcb);
        assert_ne!(sha256d(b"abc"), sha256(b"abc"));
    }
}
