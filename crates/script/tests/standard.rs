use chaindex_consensus::{chain_params, Network};
use chaindex_primitives::{p2pkh_script, p2sh_script};
use chaindex_script::opcodes::{OP_SSGEN, OP_SSRTX, OP_SSTXCHANGE, OP_TGEN};
use chaindex_script::standard::{classify_script, extract_addresses, tagged_script, ScriptClass};

#[test]
fn classify_plain_templates() {
    assert_eq!(classify_script(&p2pkh_script(&[0x11; 20])), ScriptClass::PubKeyHash);
    assert_eq!(classify_script(&p2sh_script(&[0x22; 20])), ScriptClass::ScriptHash);

    let mut p2pk = vec![33];
    p2pk.extend_from_slice(&[0x02; 33]);
    p2pk.push(0xac);
    assert_eq!(classify_script(&p2pk), ScriptClass::PubKey);
}

#[test]
fn classify_every_stake_tag() {
    let inner = p2pkh_script(&[0x33; 20]);
    for (tag, class) in [
        (OP_SSGEN, ScriptClass::StakeGen),
        (OP_SSRTX, ScriptClass::StakeRevocation),
        (OP_SSTXCHANGE, ScriptClass::StakeSubChange),
        (OP_TGEN, ScriptClass::TreasuryGen),
    ] {
        assert_eq!(classify_script(&tagged_script(tag, &inner)), class);
    }
}

#[test]
fn pubkey_output_maps_to_pubkey_hash_address() {
    let params = chain_params(Network::Testnet);
    let key = [0x02u8; 33];
    let mut p2pk = vec![33];
    p2pk.extend_from_slice(&key);
    p2pk.push(0xac);
    let from_key = extract_addresses(&p2pk, &params);
    let from_hash = extract_addresses(
        &p2pkh_script(&chaindex_primitives::hash160(&key)),
        &params,
    );
    assert_eq!(from_key.addresses, from_hash.addresses);
}

#[test]
fn unknown_script_is_nonstandard() {
    let params = chain_params(Network::Testnet);
    let addrs = extract_addresses(&[0x01], &params);
    assert_eq!(addrs.class, ScriptClass::NonStandard);
    assert!(addrs.addresses.is_empty());
    assert_eq!(addrs.required_sigs, 0);
}
