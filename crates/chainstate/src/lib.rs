//! Chain indexing on top of the relational store: block decomposition, the
//! two-phase block writer, reorganization handling and the caches in front of
//! the store.

pub mod adapter;
pub mod address_cache;
pub mod config;
pub mod decompose;
pub mod engine;
pub mod error;
pub mod reorg;
pub mod sync;
pub mod ticket_cache;
pub mod tickets;
pub mod tip;
pub mod utxo_cache;
pub mod writer;

pub use adapter::{adapter_for, ChainAdapter, PlainChainAdapter, StakeChainAdapter};
pub use config::IndexerConfig;
pub use engine::{ChainDb, PurgeReport, RepairAction};
pub use error::{ChainStateError, Phase, Progress, RollbackReport, StoreOutcome};
pub use sync::{ChainSource, ChainTipInfo, SourceBlock, SyncReport, TipStatus};
pub use tickets::StakeSnapshot;
pub use tip::BestBlock;
pub use writer::BlockInput;
