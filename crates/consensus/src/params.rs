//! Network parameter definitions.

use crate::money::{Amount, COIN};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Network {
    Mainnet,
    Testnet,
    Simnet,
    Regtest,
}

impl Network {
    pub fn name(self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet3",
            Network::Simnet => "simnet",
            Network::Regtest => "regnet",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Some(Network::Mainnet),
            "testnet" | "testnet3" | "test" => Some(Network::Testnet),
            "simnet" | "sim" => Some(Network::Simnet),
            "regtest" | "regnet" | "reg" => Some(Network::Regtest),
            _ => None,
        }
    }
}

/// Ticket lifecycle parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StakeParams {
    pub ticket_maturity: u32,
    pub ticket_expiry: u32,
    pub tickets_per_block: u16,
    pub stake_enabled_height: i64,
    pub stake_validation_height: i64,
    pub max_fresh_stake_per_block: u8,
}

impl StakeParams {
    /// Height at which a ticket bought at `purchase_height` stops being eligible to vote.
    pub fn expiry_height(&self, purchase_height: i64) -> i64 {
        purchase_height + i64::from(self.ticket_maturity) + i64::from(self.ticket_expiry)
    }

    /// Purchase heights at or below this value have expired by `height`.
    pub fn expired_at_or_below(&self, height: i64) -> i64 {
        height - i64::from(self.ticket_maturity) - i64::from(self.ticket_expiry)
    }

    /// Whether the regular tree of the block before `height` is subject to votes.
    pub fn votes_apply(&self, height: i64) -> bool {
        height >= self.stake_validation_height
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChoiceKind {
    Abstain,
    No,
    Yes,
}

impl ChoiceKind {
    /// Stored code for an agenda vote choice.
    pub fn code(self) -> i16 {
        match self {
            ChoiceKind::Yes => 0,
            ChoiceKind::Abstain => 1,
            ChoiceKind::No => 2,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Choice {
    pub id: &'static str,
    pub bits: u16,
    pub kind: ChoiceKind,
}

/// A consensus agenda voters signal on through their vote bits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Deployment {
    pub id: &'static str,
    pub vote_version: u32,
    pub mask: u16,
    pub choices: Vec<Choice>,
    pub start_time: u64,
    pub expire_time: u64,
}

impl Deployment {
    pub fn choice_for(&self, vote_bits: u16) -> Option<&Choice> {
        let masked = vote_bits & self.mask;
        self.choices.iter().find(|choice| choice.bits == masked)
    }
}

#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    /// Wire magic, stored in the meta row so a database is never reused across networks.
    pub net_magic: u32,
    pub pubkey_hash_prefix: [u8; 2],
    pub script_hash_prefix: [u8; 2],
    pub pow_limit_bits: u32,
    pub coinbase_maturity: u32,
    pub stake: StakeParams,
    pub deployments: Vec<Deployment>,
}

impl ChainParams {
    pub fn deployments_for_version(&self, vote_version: u32) -> impl Iterator<Item = &Deployment> {
        self.deployments
            .iter()
            .filter(move |deployment| deployment.vote_version == vote_version)
    }

    /// Difficulty relative to the network's proof-of-work limit.
    pub fn difficulty(&self, bits: u32) -> f64 {
        let target = compact_to_f64(bits);
        if target <= 0.0 {
            return 0.0;
        }
        compact_to_f64(self.pow_limit_bits) / target
    }
}

fn compact_to_f64(bits: u32) -> f64 {
    let exponent = (bits >> 24) as i32;
    let mantissa = f64::from(bits & 0x007f_ffff);
    mantissa * 256f64.powi(exponent - 3)
}

pub fn chain_params(network: Network) -> ChainParams {
    match network {
        Network::Mainnet => mainnet_chain_params(),
        Network::Testnet => testnet_chain_params(),
        Network::Simnet => simnet_chain_params(),
        Network::Regtest => regtest_chain_params(),
    }
}

fn yes_no_choices(mask: u16) -> Vec<Choice> {
    let low = mask & mask.wrapping_neg();
    vec![
        Choice {
            id: "abstain",
            bits: 0,
            kind: ChoiceKind::Abstain,
        },
        Choice {
            id: "no",
            bits: low,
            kind: ChoiceKind::No,
        },
        Choice {
            id: "yes",
            bits: low << 1,
            kind: ChoiceKind::Yes,
        },
    ]
}

fn standard_deployments() -> Vec<Deployment> {
    vec![
        Deployment {
            id: "reverttreasurypolicy",
            vote_version: 10,
            mask: 0x0006,
            choices: yes_no_choices(0x0006),
            start_time: 1_682_294_400,
            expire_time: 1_745_366_400,
        },
        Deployment {
            id: "changesubsidysplitr2",
            vote_version: 10,
            mask: 0x0060,
            choices: yes_no_choices(0x0060),
            start_time: 1_682_294_400,
            expire_time: 1_745_366_400,
        },
        Deployment {
            id: "blake3pow",
            vote_version: 10,
            mask: 0x0018,
            choices: yes_no_choices(0x0018),
            start_time: 1_682_294_400,
            expire_time: 1_745_366_400,
        },
    ]
}

fn mainnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Mainnet,
        net_magic: 0xd9b4_00f9,
        pubkey_hash_prefix: [0x07, 0x3f],
        script_hash_prefix: [0x07, 0x1a],
        pow_limit_bits: 0x1d00_ffff,
        coinbase_maturity: 256,
        stake: StakeParams {
            ticket_maturity: 256,
            ticket_expiry: 40_960,
            tickets_per_block: 5,
            stake_enabled_height: 256 + 256,
            stake_validation_height: 4_096,
            max_fresh_stake_per_block: 20,
        },
        deployments: standard_deployments(),
    }
}

fn testnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Testnet,
        net_magic: 0xb194_aa75,
        pubkey_hash_prefix: [0x0f, 0x21],
        script_hash_prefix: [0x0e, 0xfc],
        pow_limit_bits: 0x1e00_ffff,
        coinbase_maturity: 16,
        stake: StakeParams {
            ticket_maturity: 16,
            ticket_expiry: 6_144,
            tickets_per_block: 5,
            stake_enabled_height: 16 + 16,
            stake_validation_height: 768,
            max_fresh_stake_per_block: 20,
        },
        deployments: standard_deployments(),
    }
}

fn simnet_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Simnet,
        net_magic: 0x1230_7b54,
        pubkey_hash_prefix: [0x0e, 0x91],
        script_hash_prefix: [0x0e, 0x6c],
        pow_limit_bits: 0x207f_ffff,
        coinbase_maturity: 16,
        stake: StakeParams {
            ticket_maturity: 16,
            ticket_expiry: 384,
            tickets_per_block: 5,
            stake_enabled_height: 16 + 16,
            stake_validation_height: 16 + 16 * 2,
            max_fresh_stake_per_block: 20,
        },
        deployments: standard_deployments(),
    }
}

/// Small maturity and expiry windows so tests can walk a ticket through its whole life.
fn regtest_chain_params() -> ChainParams {
    ChainParams {
        network: Network::Regtest,
        net_magic: 0xe6d5_4a31,
        pubkey_hash_prefix: [0x0e, 0x00],
        script_hash_prefix: [0x0d, 0xdb],
        pow_limit_bits: 0x207f_ffff,
        coinbase_maturity: 4,
        stake: StakeParams {
            ticket_maturity: 4,
            ticket_expiry: 8,
            tickets_per_block: 5,
            stake_enabled_height: 4,
            stake_validation_height: 2,
            max_fresh_stake_per_block: 20,
        },
        deployments: standard_deployments(),
    }
}

/// Upper bound of any single stored amount, used to sanity-check decoded values.
pub const MAX_AMOUNT: Amount = 21_000_000 * COIN;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_height_is_purchase_plus_windows() {
        let params = chain_params(Network::Mainnet);
        assert_eq!(params.stake.expiry_height(100), 100 + 256 + 40_960);
        assert_eq!(params.stake.expired_at_or_below(100 + 256 + 40_960), 100);
    }

    #[test]
    fn deployment_choice_lookup() {
        let params = chain_params(Network::Mainnet);
        let deployment = params
            .deployments_for_version(10)
            .find(|d| d.id == "reverttreasurypolicy")
            .expect("deployment");
        assert_eq!(
            deployment.choice_for(0x0005).map(|c| c.kind),
            Some(ChoiceKind::Yes)
        );
        assert_eq!(
            deployment.choice_for(0x0003).map(|c| c.kind),
            Some(ChoiceKind::No)
        );
        assert_eq!(
            deployment.choice_for(0x0001).map(|c| c.kind),
            Some(ChoiceKind::Abstain)
        );
        assert!(deployment.choice_for(0x0007).is_none());
        assert_eq!(params.deployments_for_version(9).count(), 0);
    }

    #[test]
    fn network_names_round_trip() {
        for network in [
            Network::Mainnet,
            Network::Testnet,
            Network::Simnet,
            Network::Regtest,
        ] {
            assert_eq!(Network::parse(network.name()), Some(network));
        }
    }

    #[test]
    fn difficulty_at_limit_is_one() {
        let params = chain_params(Network::Mainnet);
        assert!((params.difficulty(params.pow_limit_bits) - 1.0).abs() < 1e-9);
        assert!(params.difficulty(0x1c00_ffff) > 255.0);
    }
}
