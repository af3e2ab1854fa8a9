//! Row types written to and read from the store. Hashes are display-order hex.

use crate::RowIds;

/// Ticket spend state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SpendType {
    Unspent = 0,
    Revoked = 1,
    Voted = 2,
}

impl SpendType {
    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(SpendType::Unspent),
            1 => Some(SpendType::Revoked),
            2 => Some(SpendType::Voted),
            _ => None,
        }
    }
}

/// Ticket pool state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PoolStatus {
    Live = 0,
    Voted = 1,
    Expired = 2,
    Missed = 3,
}

impl PoolStatus {
    pub fn from_i64(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(PoolStatus::Live),
            1 => Some(PoolStatus::Voted),
            2 => Some(PoolStatus::Expired),
            3 => Some(PoolStatus::Missed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockRow {
    pub hash: String,
    pub height: i64,
    pub size: i64,
    pub is_valid: bool,
    pub is_mainchain: bool,
    pub version: i32,
    pub num_rtx: i64,
    pub num_stx: i64,
    pub tx_db_ids: Vec<i64>,
    pub stx_db_ids: Vec<i64>,
    pub time: i64,
    pub nonce: i64,
    pub vote_bits: u16,
    pub voters: u16,
    pub fresh_stake: u8,
    pub revocations: u8,
    pub pool_size: u32,
    pub bits: u32,
    pub sbits: i64,
    pub difficulty: f64,
    pub stake_version: u32,
    pub previous_hash: String,
    pub chainwork: String,
    pub winners: Vec<String>,
}

/// Minimal view of a stored block used by the reorg and repair paths.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockStatus {
    pub id: i64,
    pub hash: String,
    pub height: i64,
    pub is_valid: bool,
    pub is_mainchain: bool,
    pub previous_hash: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TxRow {
    pub block_hash: String,
    pub block_height: i64,
    pub block_time: i64,
    pub tx_type: i16,
    pub version: u16,
    pub tree: i16,
    pub tx_hash: String,
    pub block_index: u32,
    pub lock_time: u32,
    pub expiry: u32,
    pub size: i64,
    pub spent: i64,
    pub sent: i64,
    pub fees: i64,
    pub mix_count: i64,
    pub mix_denom: i64,
    pub vin_db_ids: RowIds,
    pub vout_db_ids: RowIds,
    pub is_valid: bool,
    pub is_mainchain: bool,
}

/// Transaction row ids plus the input and output rows they own.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TxRowRef {
    pub id: i64,
    pub tx_hash: String,
    pub tree: i16,
    pub vin_ids: RowIds,
    pub vout_ids: RowIds,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VinRow {
    pub tx_hash: String,
    pub tx_index: u32,
    pub tx_tree: i16,
    pub is_valid: bool,
    pub is_mainchain: bool,
    pub block_time: i64,
    pub prev_tx_hash: String,
    pub prev_tx_index: u32,
    pub prev_tx_tree: i16,
    pub value_in: i64,
    pub tx_type: i16,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VoutRow {
    pub tx_hash: String,
    pub tx_index: u32,
    pub tx_tree: i16,
    pub value: i64,
    pub version: u16,
    pub pk_script: Vec<u8>,
    pub script_req_sigs: u16,
    pub script_type: String,
    pub script_addresses: Vec<String>,
    pub mixed: bool,
}

/// Funding output data needed to record a spend.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UtxoRecord {
    pub vout_id: i64,
    pub value: i64,
    pub addresses: Vec<String>,
    pub mixed: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AddressRow {
    pub address: String,
    pub tx_hash: String,
    pub valid_mainchain: bool,
    /// For funding rows, the spending tx (empty while unspent). For spending
    /// rows, the funding tx.
    pub matching_tx_hash: String,
    pub value: i64,
    pub block_time: i64,
    pub is_funding: bool,
    pub tx_vin_vout_index: u32,
    pub tx_vin_vout_row_id: i64,
    pub tx_type: i16,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AddressBalance {
    pub address: String,
    pub num_spent: i64,
    pub num_unspent: i64,
    pub total_spent: i64,
    pub total_unspent: i64,
}

impl AddressBalance {
    pub fn total_received(&self) -> i64 {
        self.total_spent + self.total_unspent
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TicketRow {
    pub tx_hash: String,
    pub block_hash: String,
    pub block_height: i64,
    pub purchase_tx_db_id: i64,
    pub stakesubmission_address: String,
    pub is_multisig: bool,
    pub is_split: bool,
    pub num_inputs: i64,
    pub price: f64,
    pub fee: f64,
    pub spend_type: SpendType,
    pub pool_status: PoolStatus,
    pub is_mainchain: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TicketStatus {
    pub id: i64,
    pub tx_hash: String,
    pub block_height: i64,
    pub spend_type: SpendType,
    pub pool_status: PoolStatus,
    pub spend_height: Option<i64>,
    pub spend_tx_db_id: Option<i64>,
    pub is_mainchain: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VoteRow {
    pub height: i64,
    pub tx_hash: String,
    pub block_hash: String,
    pub candidate_block_hash: String,
    pub version: u32,
    pub vote_bits: u16,
    pub block_valid: bool,
    pub ticket_hash: String,
    pub ticket_tx_db_id: i64,
    pub ticket_price: f64,
    pub vote_reward: f64,
    pub is_mainchain: bool,
    pub block_time: i64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MissRow {
    pub height: i64,
    pub block_hash: String,
    pub candidate_block_hash: String,
    pub ticket_hash: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AgendaVoteRow {
    pub votes_row_id: i64,
    pub agendas_row_id: i64,
    pub choice: i16,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TSpendVoteRow {
    pub votes_row_id: i64,
    pub tspend_hash: String,
    pub choice: i16,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreasuryRow {
    pub tx_hash: String,
    pub tx_type: i16,
    /// Positive for credits to the treasury, negative for spends.
    pub value: i64,
    pub block_hash: String,
    pub block_height: i64,
    pub block_time: i64,
    pub is_mainchain: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SwapRow {
    pub contract_tx: String,
    pub contract_vout: u32,
    pub spend_tx: String,
    pub spend_vin: u32,
    pub spend_height: i64,
    pub spend_block_hash: String,
    pub p2sh_addr: String,
    pub value: i64,
    pub secret_hash: Vec<u8>,
    pub secret: Option<Vec<u8>>,
    pub lock_time: i64,
    pub is_refund: bool,
    pub is_mainchain: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetaRow {
    pub net_name: String,
    pub currency_net: u32,
    pub best_block_height: i64,
    pub best_block_hash: String,
    pub compatibility_version: u32,
    pub schema_version: u32,
    pub maintenance_version: u32,
    pub ibd_complete: bool,
}
