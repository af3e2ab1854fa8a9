use std::fmt;

use chaindex_storage::StoreError;

/// The store step an error came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    InsertVouts,
    InsertVins,
    InsertTxns,
    InsertTickets,
    InsertVotes,
    InsertMisses,
    InsertTreasury,
    InsertSwaps,
    InsertAddresses,
    SpendLinkage,
    TicketSpends,
    InsertBlock,
    Mainchain,
    Disapproval,
    Meta,
    Purge,
    Query,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::InsertVouts => "insert vouts",
            Phase::InsertVins => "insert vins",
            Phase::InsertTxns => "insert transactions",
            Phase::InsertTickets => "insert tickets",
            Phase::InsertVotes => "insert votes",
            Phase::InsertMisses => "insert misses",
            Phase::InsertTreasury => "insert treasury",
            Phase::InsertSwaps => "insert swaps",
            Phase::InsertAddresses => "insert addresses",
            Phase::SpendLinkage => "spend linkage",
            Phase::TicketSpends => "ticket spends",
            Phase::InsertBlock => "insert block",
            Phase::Mainchain => "mainchain update",
            Phase::Disapproval => "disapproval",
            Phase::Meta => "meta update",
            Phase::Purge => "purge",
            Phase::Query => "query",
        }
    }
}

/// Counts from a block store, kept even when part of it failed.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StoreOutcome {
    pub height: i64,
    pub num_txns: usize,
    pub num_vins: usize,
    pub num_vouts: usize,
    pub num_addresses: usize,
    pub num_spends_linked: usize,
    pub num_tickets: usize,
    pub num_votes: usize,
    pub num_misses: usize,
    pub num_treasury: usize,
    pub num_swaps: usize,
    /// Value of mixed outputs created minus mixed outputs spent.
    pub mix_delta: i64,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RollbackReport {
    pub from_height: i64,
    pub height_reached: i64,
    pub blocks: usize,
    pub txns: usize,
    pub vins: usize,
    pub addresses: usize,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Progress {
    Stored(StoreOutcome),
    RolledBack(RollbackReport),
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Stored(outcome) => write!(
                f,
                "stored {} txns, {} vins, {} vouts at height {}",
                outcome.num_txns, outcome.num_vins, outcome.num_vouts, outcome.height
            ),
            Progress::RolledBack(report) => write!(
                f,
                "rolled back {} blocks from {} to {}",
                report.blocks, report.from_height, report.height_reached
            ),
        }
    }
}

#[derive(Debug)]
pub enum ChainStateError {
    Store { phase: Phase, source: StoreError },
    RowCountMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    MissingParent(String),
    SchemaVersion { found: u32, expected: u32 },
    NetworkMismatch { found: String, expected: String },
    MetaMismatch { meta_height: i64, blocks_height: i64 },
    Source(String),
    Canceled { height: i64 },
    InvalidBlock(&'static str),
    /// Work stopped part way; `progress` says how far it got.
    Incomplete {
        progress: Progress,
        source: Box<ChainStateError>,
    },
}

impl ChainStateError {
    pub fn incomplete(progress: Progress, source: ChainStateError) -> Self {
        ChainStateError::Incomplete {
            progress,
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping progress wrappers.
    pub fn root(&self) -> &ChainStateError {
        match self {
            ChainStateError::Incomplete { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), ChainStateError::Store { source, .. } if source.is_not_found())
    }

    pub fn is_timeout(&self) -> bool {
        match self.root() {
            ChainStateError::Store { source, .. } => source.is_timeout(),
            ChainStateError::Canceled { .. } => true,
            _ => false,
        }
    }
}

impl fmt::Display for ChainStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStateError::Store { phase, source } => write!(f, "{}: {source}", phase.as_str()),
            ChainStateError::RowCountMismatch {
                what,
                expected,
                got,
            } => write!(f, "{what}: expected {expected} row ids, got {got}"),
            ChainStateError::MissingParent(hash) => write!(f, "parent block {hash} not indexed"),
            ChainStateError::SchemaVersion { found, expected } => {
                write!(f, "schema version {found} does not match {expected}")
            }
            ChainStateError::NetworkMismatch { found, expected } => {
                write!(f, "database is for {found}, not {expected}")
            }
            ChainStateError::MetaMismatch {
                meta_height,
                blocks_height,
            } => write!(
                f,
                "meta best block {meta_height} disagrees with blocks table tip {blocks_height}"
            ),
            ChainStateError::Source(message) => write!(f, "chain source: {message}"),
            ChainStateError::Canceled { height } => write!(f, "canceled at height {height}"),
            ChainStateError::InvalidBlock(message) => write!(f, "invalid block: {message}"),
            ChainStateError::Incomplete { progress, source } => write!(f, "{source} ({progress})"),
        }
    }
}

impl std::error::Error for ChainStateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ChainStateError::Store { source, .. } => Some(source),
            ChainStateError::Incomplete { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<StoreError> for ChainStateError {
    fn from(source: StoreError) -> Self {
        ChainStateError::Store {
            phase: Phase::Query,
            source,
        }
    }
}

/// Tags a store error with the step that produced it.
pub(crate) trait PhaseExt<T> {
    fn phase(self, phase: Phase) -> Result<T, ChainStateError>;
}

impl<T> PhaseExt<T> for Result<T, StoreError> {
    fn phase(self, phase: Phase) -> Result<T, ChainStateError> {
        self.map_err(|source| ChainStateError::Store { phase, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_survive_wrapping() {
        let err = ChainStateError::incomplete(
            Progress::RolledBack(RollbackReport::default()),
            Err::<(), _>(StoreError::Timeout).phase(Phase::Mainchain).unwrap_err(),
        );
        assert!(err.is_timeout());
        assert!(!err.is_not_found());
        assert!(err.to_string().starts_with("mainchain update: query deadline exceeded"));

        let missing: ChainStateError = StoreError::NotFound.into();
        assert!(missing.is_not_found());
    }
}
