//! Detection of hash-time-locked atomic swap contracts from the input that spends them.

use chaindex_consensus::ChainParams;
use chaindex_primitives::{encode_address, hash160};

use crate::opcodes::*;
use crate::push::{instructions, script_num, Instruction};

/// Fields of a recognised swap contract script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SwapContract {
    pub secret_hash: [u8; 32],
    pub secret_size: u8,
    pub recipient_hash: [u8; 20],
    pub refund_hash: [u8; 20],
    pub lock_time: i64,
}

/// A contract redemption or refund found in a signature script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SwapSpend {
    pub contract: SwapContract,
    pub p2sh_address: String,
    /// Revealed secret; `None` for refunds.
    pub secret: Option<Vec<u8>>,
}

impl SwapSpend {
    pub fn is_refund(&self) -> bool {
        self.secret.is_none()
    }
}

/// Parses the contract template:
///
/// `IF SIZE <n> EQUALVERIFY SHA256 <hash> EQUALVERIFY DUP HASH160 <recipient>
///  ELSE <locktime> CHECKLOCKTIMEVERIFY DROP DUP HASH160 <refund>
///  ENDIF EQUALVERIFY CHECKSIG`
pub fn parse_contract(script: &[u8]) -> Option<SwapContract> {
    use Instruction::{Op, Push};

    let ins = instructions(script).ok()?;
    match ins.as_slice() {
        [Op(OP_IF), Op(OP_SIZE), size, Op(OP_EQUALVERIFY), Op(OP_SHA256), Push(secret_hash), Op(OP_EQUALVERIFY), Op(OP_DUP), Op(OP_HASH160), Push(recipient), Op(OP_ELSE), Push(lock_time), Op(OP_CHECKLOCKTIMEVERIFY), Op(OP_DROP), Op(OP_DUP), Op(OP_HASH160), Push(refund), Op(OP_ENDIF), Op(OP_EQUALVERIFY), Op(OP_CHECKSIG)] =>
        {
            let secret_size = match size {
                Push(data) => u8::try_from(script_num(data, 4)?).ok()?,
                Op(op) => small_int_value(*op)?,
            };
            Some(SwapContract {
                secret_hash: (*secret_hash).try_into().ok()?,
                secret_size,
                recipient_hash: (*recipient).try_into().ok()?,
                refund_hash: (*refund).try_into().ok()?,
                lock_time: script_num(lock_time, 5)?,
            })
        }
        _ => None,
    }
}

/// Inspects a signature script for a swap redeem (`sig pubkey secret TRUE contract`)
/// or refund (`sig pubkey FALSE contract`).
pub fn extract_swap_spend(signature_script: &[u8], params: &ChainParams) -> Option<SwapSpend> {
    use Instruction::{Op, Push};

    let ins = instructions(signature_script).ok()?;
    let (secret, contract_script) = match ins.as_slice() {
        [Push(_sig), Push(_pubkey), Push(secret), Op(OP_TRUE), Push(contract)] => {
            (Some(secret.to_vec()), *contract)
        }
        [Push(_sig), Push(_pubkey), Push(flag), Push(contract)] if flag.is_empty() => {
            (None, *contract)
        }
        _ => return None,
    };
    let contract = parse_contract(contract_script)?;
    if let Some(secret) = &secret {
        if secret.len() != usize::from(contract.secret_size) {
            return None;
        }
    }
    Some(SwapSpend {
        p2sh_address: encode_address(params.script_hash_prefix, &hash160(contract_script)),
        contract,
        secret,
    })
}

/// Builds a contract script; used by tests and fixtures.
pub fn build_contract(
    secret_hash: &[u8; 32],
    recipient: &[u8; 20],
    refund: &[u8; 20],
    lock_time: u32,
) -> Vec<u8> {
    let mut script = vec![OP_IF, OP_SIZE, 0x01, 0x20, OP_EQUALVERIFY, OP_SHA256, OP_DATA_32];
    script.extend_from_slice(secret_hash);
    script.extend_from_slice(&[OP_EQUALVERIFY, OP_DUP, OP_HASH160, OP_DATA_20]);
    script.extend_from_slice(recipient);
    script.push(OP_ELSE);
    let mut lock = lock_time.to_le_bytes().to_vec();
    while lock.len() > 1 && lock[lock.len() - 1] == 0 && lock[lock.len() - 2] & 0x80 == 0 {
        lock.pop();
    }
    if lock.last().is_some_and(|byte| byte & 0x80 != 0) {
        lock.push(0);
    }
    script.push(lock.len() as u8);
    script.extend_from_slice(&lock);
    script.extend_from_slice(&[OP_CHECKLOCKTIMEVERIFY, OP_DROP, OP_DUP, OP_HASH160, OP_DATA_20]);
    script.extend_from_slice(refund);
    script.extend_from_slice(&[OP_ENDIF, OP_EQUALVERIFY, OP_CHECKSIG]);
    script
}
