//! Standard output script classification and address extraction.

use chaindex_consensus::ChainParams;
use chaindex_primitives::{encode_address, hash160};

use crate::opcodes::*;
use crate::push::{instructions, Instruction};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ScriptClass {
    NonStandard,
    PubKey,
    PubKeyHash,
    ScriptHash,
    MultiSig,
    NullData,
    StakeSubmission,
    StakeGen,
    StakeRevocation,
    StakeSubChange,
    TreasuryAdd,
    TreasuryGen,
}

impl ScriptClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptClass::NonStandard => "nonstandard",
            ScriptClass::PubKey => "pubkey",
            ScriptClass::PubKeyHash => "pubkeyhash",
            ScriptClass::ScriptHash => "scripthash",
            ScriptClass::MultiSig => "multisig",
            ScriptClass::NullData => "nulldata",
            ScriptClass::StakeSubmission => "stakesubmission",
            ScriptClass::StakeGen => "stakegen",
            ScriptClass::StakeRevocation => "stakerevoke",
            ScriptClass::StakeSubChange => "sstxchange",
            ScriptClass::TreasuryAdd => "treasuryadd",
            ScriptClass::TreasuryGen => "treasurygen",
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            OP_SSTX => Some(ScriptClass::StakeSubmission),
            OP_SSGEN => Some(ScriptClass::StakeGen),
            OP_SSRTX => Some(ScriptClass::StakeRevocation),
            OP_SSTXCHANGE => Some(ScriptClass::StakeSubChange),
            OP_TGEN => Some(ScriptClass::TreasuryGen),
            _ => None,
        }
    }
}

/// Result of decoding an output script for indexing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptAddresses {
    pub class: ScriptClass,
    pub addresses: Vec<String>,
    pub required_sigs: u16,
    /// Set for tagged stake/treasury outputs whose payload is a script hash.
    pub is_script_hash: bool,
}

enum Payload<'a> {
    PubKeyHash(&'a [u8]),
    ScriptHash(&'a [u8]),
}

fn pubkey_hash_payload(script: &[u8]) -> Option<&[u8]> {
    (script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == OP_DATA_20
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG)
        .then(|| &script[3..23])
}

fn script_hash_payload(script: &[u8]) -> Option<&[u8]> {
    (script.len() == 23 && script[0] == OP_HASH160 && script[1] == OP_DATA_20 && script[22] == OP_EQUAL)
        .then(|| &script[2..22])
}

fn hash_payload(script: &[u8]) -> Option<Payload<'_>> {
    pubkey_hash_payload(script)
        .map(Payload::PubKeyHash)
        .or_else(|| script_hash_payload(script).map(Payload::ScriptHash))
}

fn pubkey_payload(script: &[u8]) -> Option<&[u8]> {
    let key_len = match script.first().copied() {
        Some(OP_DATA_33) => 33,
        Some(OP_DATA_65) => 65,
        _ => return None,
    };
    (script.len() == key_len + 2 && script[script.len() - 1] == OP_CHECKSIG)
        .then(|| &script[1..1 + key_len])
}

fn multisig_keys(script: &[u8]) -> Option<(u8, Vec<&[u8]>)> {
    if script.last() != Some(&OP_CHECKMULTISIG) {
        return None;
    }
    let ins = instructions(script).ok()?;
    if ins.len() < 4 {
        return None;
    }
    let required = match ins[0] {
        Instruction::Op(op) => small_int_value(op)?,
        _ => return None,
    };
    let total = match ins[ins.len() - 2] {
        Instruction::Op(op) => small_int_value(op)?,
        _ => return None,
    };
    let keys: Vec<&[u8]> = ins[1..ins.len() - 2]
        .iter()
        .map(|ins| ins.push_data().filter(|key| key.len() == 33 || key.len() == 65))
        .collect::<Option<_>>()?;
    if required == 0 || keys.len() != total as usize || required > total {
        return None;
    }
    Some((required, keys))
}

fn is_null_data(script: &[u8]) -> bool {
    if script.first() != Some(&OP_RETURN) {
        return false;
    }
    match instructions(&script[1..]) {
        Ok(ins) => ins.iter().all(|ins| matches!(ins, Instruction::Push(_))),
        Err(_) => false,
    }
}

pub fn classify_script(script: &[u8]) -> ScriptClass {
    if let Some(&tag) = script.first() {
        if let Some(class) = ScriptClass::from_tag(tag) {
            if hash_payload(&script[1..]).is_some() {
                return class;
            }
            return ScriptClass::NonStandard;
        }
        if tag == OP_TADD && script.len() == 1 {
            return ScriptClass::TreasuryAdd;
        }
    }
    match hash_payload(script) {
        Some(Payload::PubKeyHash(_)) => ScriptClass::PubKeyHash,
        Some(Payload::ScriptHash(_)) => ScriptClass::ScriptHash,
        None if pubkey_payload(script).is_some() => ScriptClass::PubKey,
        None if multisig_keys(script).is_some() => ScriptClass::MultiSig,
        None if is_null_data(script) => ScriptClass::NullData,
        None => ScriptClass::NonStandard,
    }
}

/// Decodes `script` into its class and the addresses that own it.
pub fn extract_addresses(script: &[u8], params: &ChainParams) -> ScriptAddresses {
    let class = classify_script(script);
    let mut out = ScriptAddresses {
        class,
        addresses: Vec::new(),
        required_sigs: 0,
        is_script_hash: false,
    };

    let hashed = match class {
        ScriptClass::PubKeyHash | ScriptClass::ScriptHash => hash_payload(script),
        ScriptClass::StakeSubmission
        | ScriptClass::StakeGen
        | ScriptClass::StakeRevocation
        | ScriptClass::StakeSubChange
        | ScriptClass::TreasuryGen => hash_payload(&script[1..]),
        _ => None,
    };
    if let Some(payload) = hashed {
        let (prefix, hash) = match payload {
            Payload::PubKeyHash(hash) => (params.pubkey_hash_prefix, hash),
            Payload::ScriptHash(hash) => {
                out.is_script_hash = true;
                (params.script_hash_prefix, hash)
            }
        };
        if let Ok(hash) = <[u8; 20]>::try_from(hash) {
            out.addresses.push(encode_address(prefix, &hash));
            out.required_sigs = 1;
        }
        return out;
    }

    match class {
        ScriptClass::PubKey => {
            if let Some(key) = pubkey_payload(script) {
                out.addresses
                    .push(encode_address(params.pubkey_hash_prefix, &hash160(key)));
                out.required_sigs = 1;
            }
        }
        ScriptClass::MultiSig => {
            if let Some((required, keys)) = multisig_keys(script) {
                out.addresses = keys
                    .into_iter()
                    .map(|key| encode_address(params.pubkey_hash_prefix, &hash160(key)))
                    .collect();
                out.required_sigs = u16::from(required);
            }
        }
        _ => {}
    }
    out
}

/// Wraps a pubkey-hash or script-hash template with a stake tag.
pub fn tagged_script(tag: u8, inner: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(inner.len() + 1);
    script.push(tag);
    script.extend_from_slice(inner);
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaindex_consensus::{chain_params, Network};
    use chaindex_primitives::{p2pkh_script, p2sh_script};

    #[test]
    fn tagged_outputs_keep_their_address() {
        let params = chain_params(Network::Mainnet);
        let plain = p2pkh_script(&[0x11; 20]);
        let ticket = tagged_script(OP_SSTX, &plain);
        assert_eq!(classify_script(&ticket), ScriptClass::StakeSubmission);

        let plain_addrs = extract_addresses(&plain, &params);
        let ticket_addrs = extract_addresses(&ticket, &params);
        assert_eq!(plain_addrs.addresses, ticket_addrs.addresses);
        assert_eq!(ticket_addrs.class.as_str(), "stakesubmission");
    }

    #[test]
    fn tagged_script_hash_is_flagged() {
        let params = chain_params(Network::Mainnet);
        let script = tagged_script(OP_SSTX, &p2sh_script(&[0x22; 20]));
        let addrs = extract_addresses(&script, &params);
        assert!(addrs.is_script_hash);
        assert_eq!(addrs.addresses.len(), 1);
    }

    #[test]
    fn tag_without_template_is_nonstandard() {
        assert_eq!(classify_script(&[OP_SSGEN, 0x01, 0x02]), ScriptClass::NonStandard);
        assert_eq!(classify_script(&[OP_TADD]), ScriptClass::TreasuryAdd);
    }

    #[test]
    fn bare_multisig() {
        let params = chain_params(Network::Mainnet);
        let mut script = vec![0x52];
        for fill in [0x02u8, 0x03] {
            script.push(OP_DATA_33);
            script.extend_from_slice(&[fill; 33]);
        }
        script.extend_from_slice(&[0x52, OP_CHECKMULTISIG]);
        let addrs = extract_addresses(&script, &params);
        assert_eq!(addrs.class, ScriptClass::MultiSig);
        assert_eq!(addrs.addresses.len(), 2);
        assert_eq!(addrs.required_sigs, 2);
    }

    #[test]
    fn null_data_has_no_addresses() {
        let params = chain_params(Network::Mainnet);
        let addrs = extract_addresses(&[OP_RETURN, 0x02, 0xde, 0xad], &params);
        assert_eq!(addrs.class, ScriptClass::NullData);
        assert!(addrs.addresses.is_empty());
    }
}
