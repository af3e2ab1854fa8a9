//! Chain parameters, stake rules, and agenda deployments.

pub mod constants;
pub mod hex;
pub mod money;
pub mod params;

pub use hex::{bytes_from_hex, bytes_to_hex, hash256_from_hex, hash256_to_hex, HexError};
pub use money::{atoms_to_coin, Amount, COIN};
pub use params::{
    chain_params, ChainParams, Choice, ChoiceKind, Deployment, Network, StakeParams,
};

pub type Hash256 = [u8; 32];

pub const ZERO_HASH: Hash256 = [0u8; 32];
