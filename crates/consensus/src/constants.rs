//! Stake and treasury constants shared by the classifier and the indexer.

/// Vote bit set when the voter approves the parent block's regular tree.
pub const VOTE_BITS_APPROVE_PARENT: u16 = 0x0001;

/// Transaction version that carries treasury add/spend/base semantics.
pub const TREASURY_TX_VERSION: u16 = 3;

/// Marker that prefixes the treasury-spend vote payload in a vote's last output.
pub const TSPEND_VOTE_MARKER: [u8; 2] = *b"TV";

/// Maximum number of treasury-spend votes a single vote may carry.
pub const MAX_TSPEND_VOTES_PER_VOTE: usize = 7;

/// Minimum repeat count for an output value to count as a mix denomination.
pub const MIX_MIN_PARTICIPANTS: usize = 3;

/// Schema version the indexer writes. Older databases must be upgraded out of band.
pub const SCHEMA_VERSION: u32 = 3;
pub const COMPATIBILITY_VERSION: u32 = 1;
pub const MAINTENANCE_VERSION: u32 = 0;
