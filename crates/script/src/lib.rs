//! Output script classification, address extraction, stake transaction typing,
//! and atomic-swap contract detection.

pub mod opcodes;
pub mod push;
pub mod stake;
pub mod standard;
pub mod swap;

pub use push::{instructions, Instruction, ScriptError};
pub use stake::{classify_transaction, parse_vote, TSpendChoice, TxType, VoteInfo};
pub use standard::{classify_script, extract_addresses, ScriptClass, ScriptAddresses};
pub use swap::{extract_swap_spend, SwapContract, SwapSpend};
