//! Block and transaction model with its wire encoding.
//!
//! Blocks carry two transaction trees: the regular tree and the stake tree.
//! Transaction ids hash the prefix serialization only, so witness data
//! (signature scripts and input values) never changes an id.

pub mod address;
pub mod block;
pub mod encoding;
pub mod hash;
pub mod outpoint;
pub mod transaction;

pub use address::{decode_address, encode_address, p2pkh_script, p2sh_script, AddressError, AddressKind};
pub use block::{Block, BlockHeader};
pub use hash::{hash160, sha256, sha256d};
pub use outpoint::OutPoint;
pub use transaction::{Transaction, TxIn, TxOut, TxTree};
