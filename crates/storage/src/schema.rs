//! Table and index definitions.
//!
//! Unique indexes double as the conflict targets of the upsert and
//! insert-or-skip statements, so they must exist before any duplicate-checked
//! insert runs. Bulk loads drop them, insert with plain statements, then
//! recreate them after removing duplicate rows.

use chaindex_log::{log_info, log_warn};
use rusqlite::Connection;

use crate::StoreError;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Table {
    Meta,
    Blocks,
    BlockChain,
    Transactions,
    Vins,
    Vouts,
    Addresses,
    Tickets,
    Votes,
    Misses,
    Agendas,
    AgendaVotes,
    TSpendVotes,
    Treasury,
    Swaps,
}

impl Table {
    pub const ALL: [Table; 15] = [
        Table::Meta,
        Table::Blocks,
        Table::BlockChain,
        Table::Transactions,
        Table::Vins,
        Table::Vouts,
        Table::Addresses,
        Table::Tickets,
        Table::Votes,
        Table::Misses,
        Table::Agendas,
        Table::AgendaVotes,
        Table::TSpendVotes,
        Table::Treasury,
        Table::Swaps,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Meta => "meta",
            Table::Blocks => "blocks",
            Table::BlockChain => "block_chain",
            Table::Transactions => "transactions",
            Table::Vins => "vins",
            Table::Vouts => "vouts",
            Table::Addresses => "addresses",
            Table::Tickets => "tickets",
            Table::Votes => "votes",
            Table::Misses => "misses",
            Table::Agendas => "agendas",
            Table::AgendaVotes => "agenda_votes",
            Table::TSpendVotes => "tspend_votes",
            Table::Treasury => "treasury",
            Table::Swaps => "swaps",
        }
    }

    fn create_sql(self) -> &'static str {
        match self {
            Table::Meta => {
                "CREATE TABLE IF NOT EXISTS meta (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    net_name TEXT NOT NULL,
                    currency_net INTEGER NOT NULL,
                    best_block_height INTEGER NOT NULL DEFAULT -1,
                    best_block_hash TEXT NOT NULL DEFAULT '',
                    compatibility_version INTEGER NOT NULL,
                    schema_version INTEGER NOT NULL,
                    maintenance_version INTEGER NOT NULL,
                    ibd_complete INTEGER NOT NULL DEFAULT 0
                )"
            }
            Table::Blocks => {
                "CREATE TABLE IF NOT EXISTS blocks (
                    id INTEGER PRIMARY KEY,
                    hash TEXT NOT NULL,
                    height INTEGER NOT NULL,
                    size INTEGER NOT NULL,
                    is_valid INTEGER NOT NULL,
                    is_mainchain INTEGER NOT NULL,
                    version INTEGER NOT NULL,
                    numtx INTEGER NOT NULL,
                    num_rtx INTEGER NOT NULL,
                    num_stx INTEGER NOT NULL,
                    txdbids TEXT NOT NULL,
                    stxdbids TEXT NOT NULL,
                    time INTEGER NOT NULL,
                    nonce INTEGER NOT NULL,
                    vote_bits INTEGER NOT NULL,
                    voters INTEGER NOT NULL,
                    fresh_stake INTEGER NOT NULL,
                    revocations INTEGER NOT NULL,
                    pool_size INTEGER NOT NULL,
                    bits INTEGER NOT NULL,
                    sbits INTEGER NOT NULL,
                    difficulty REAL NOT NULL,
                    stake_version INTEGER NOT NULL,
                    previous_hash TEXT NOT NULL,
                    chainwork TEXT NOT NULL,
                    winners TEXT NOT NULL
                )"
            }
            Table::BlockChain => {
                "CREATE TABLE IF NOT EXISTS block_chain (
                    block_db_id INTEGER PRIMARY KEY,
                    prev_hash TEXT NOT NULL,
                    this_hash TEXT NOT NULL UNIQUE,
                    next_hash TEXT NOT NULL DEFAULT ''
                )"
            }
            Table::Transactions => {
                "CREATE TABLE IF NOT EXISTS transactions (
                    id INTEGER PRIMARY KEY,
                    block_hash TEXT NOT NULL,
                    block_height INTEGER NOT NULL,
                    block_time INTEGER NOT NULL,
                    tx_type INTEGER NOT NULL,
                    version INTEGER NOT NULL,
                    tree INTEGER NOT NULL,
                    tx_hash TEXT NOT NULL,
                    block_index INTEGER NOT NULL,
                    lock_time INTEGER NOT NULL,
                    expiry INTEGER NOT NULL,
                    size INTEGER NOT NULL,
                    spent INTEGER NOT NULL,
                    sent INTEGER NOT NULL,
                    fees INTEGER NOT NULL,
                    mix_count INTEGER NOT NULL,
                    mix_denom INTEGER NOT NULL,
                    num_vin INTEGER NOT NULL,
                    vin_db_ids TEXT NOT NULL,
                    num_vout INTEGER NOT NULL,
                    vout_db_ids TEXT NOT NULL,
                    is_valid INTEGER NOT NULL,
                    is_mainchain INTEGER NOT NULL
                )"
            }
            Table::Vins => {
                "CREATE TABLE IF NOT EXISTS vins (
                    id INTEGER PRIMARY KEY,
                    tx_hash TEXT NOT NULL,
                    tx_index INTEGER NOT NULL,
                    tx_tree INTEGER NOT NULL,
                    is_valid INTEGER NOT NULL,
                    is_mainchain INTEGER NOT NULL,
                    block_time INTEGER NOT NULL,
                    prev_tx_hash TEXT NOT NULL,
                    prev_tx_index INTEGER NOT NULL,
                    prev_tx_tree INTEGER NOT NULL,
                    value_in INTEGER NOT NULL,
                    tx_type INTEGER NOT NULL
                )"
            }
            Table::Vouts => {
                "CREATE TABLE IF NOT EXISTS vouts (
                    id INTEGER PRIMARY KEY,
                    tx_hash TEXT NOT NULL,
                    tx_index INTEGER NOT NULL,
                    tx_tree INTEGER NOT NULL,
                    value INTEGER NOT NULL,
                    version INTEGER NOT NULL,
                    pkscript BLOB NOT NULL,
                    script_req_sigs INTEGER NOT NULL,
                    script_type TEXT NOT NULL,
                    script_addresses TEXT NOT NULL,
                    mixed INTEGER NOT NULL DEFAULT 0,
                    spend_tx_row_id INTEGER
                )"
            }
            Table::Addresses => {
                "CREATE TABLE IF NOT EXISTS addresses (
                    id INTEGER PRIMARY KEY,
                    address TEXT NOT NULL,
                    tx_hash TEXT NOT NULL,
                    valid_mainchain INTEGER NOT NULL,
                    matching_tx_hash TEXT NOT NULL DEFAULT '',
                    value INTEGER NOT NULL,
                    block_time INTEGER NOT NULL,
                    is_funding INTEGER NOT NULL,
                    tx_vin_vout_index INTEGER NOT NULL,
                    tx_vin_vout_row_id INTEGER NOT NULL,
                    tx_type INTEGER NOT NULL
                )"
            }
            Table::Tickets => {
                "CREATE TABLE IF NOT EXISTS tickets (
                    id INTEGER PRIMARY KEY,
                    tx_hash TEXT NOT NULL,
                    block_hash TEXT NOT NULL,
                    block_height INTEGER NOT NULL,
                    purchase_tx_db_id INTEGER NOT NULL,
                    stakesubmission_address TEXT NOT NULL,
                    is_multisig INTEGER NOT NULL,
                    is_split INTEGER NOT NULL,
                    num_inputs INTEGER NOT NULL,
                    price REAL NOT NULL,
                    fee REAL NOT NULL,
                    spend_type INTEGER NOT NULL,
                    pool_status INTEGER NOT NULL,
                    is_mainchain INTEGER NOT NULL,
                    spend_height INTEGER,
                    spend_tx_db_id INTEGER
                )"
            }
            Table::Votes => {
                "CREATE TABLE IF NOT EXISTS votes (
                    id INTEGER PRIMARY KEY,
                    height INTEGER NOT NULL,
                    tx_hash TEXT NOT NULL,
                    block_hash TEXT NOT NULL,
                    candidate_block_hash TEXT NOT NULL,
                    version INTEGER NOT NULL,
                    vote_bits INTEGER NOT NULL,
                    block_valid INTEGER NOT NULL,
                    ticket_hash TEXT NOT NULL,
                    ticket_tx_db_id INTEGER NOT NULL,
                    ticket_price REAL NOT NULL,
                    vote_reward REAL NOT NULL,
                    is_mainchain INTEGER NOT NULL,
                    block_time INTEGER NOT NULL
                )"
            }
            Table::Misses => {
                "CREATE TABLE IF NOT EXISTS misses (
                    id INTEGER PRIMARY KEY,
                    height INTEGER NOT NULL,
                    block_hash TEXT NOT NULL,
                    candidate_block_hash TEXT NOT NULL,
                    ticket_hash TEXT NOT NULL
                )"
            }
            Table::Agendas => {
                "CREATE TABLE IF NOT EXISTS agendas (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    vote_version INTEGER NOT NULL,
                    mask INTEGER NOT NULL
                )"
            }
            Table::AgendaVotes => {
                "CREATE TABLE IF NOT EXISTS agenda_votes (
                    id INTEGER PRIMARY KEY,
                    votes_row_id INTEGER NOT NULL,
                    agendas_row_id INTEGER NOT NULL,
                    agenda_vote_choice INTEGER NOT NULL
                )"
            }
            Table::TSpendVotes => {
                "CREATE TABLE IF NOT EXISTS tspend_votes (
                    id INTEGER PRIMARY KEY,
                    votes_row_id INTEGER NOT NULL,
                    tspend_hash TEXT NOT NULL,
                    tspend_vote_choice INTEGER NOT NULL
                )"
            }
            Table::Treasury => {
                "CREATE TABLE IF NOT EXISTS treasury (
                    id INTEGER PRIMARY KEY,
                    tx_hash TEXT NOT NULL,
                    tx_type INTEGER NOT NULL,
                    value INTEGER NOT NULL,
                    block_hash TEXT NOT NULL,
                    block_height INTEGER NOT NULL,
                    block_time INTEGER NOT NULL,
                    is_mainchain INTEGER NOT NULL
                )"
            }
            Table::Swaps => {
                "CREATE TABLE IF NOT EXISTS swaps (
                    contract_tx TEXT NOT NULL,
                    contract_vout INTEGER NOT NULL,
                    spend_tx TEXT NOT NULL,
                    spend_vin INTEGER NOT NULL,
                    spend_height INTEGER NOT NULL,
                    spend_block_hash TEXT NOT NULL,
                    p2sh_addr TEXT NOT NULL,
                    value INTEGER NOT NULL,
                    secret_hash BLOB NOT NULL,
                    secret BLOB,
                    lock_time INTEGER NOT NULL,
                    is_refund INTEGER NOT NULL,
                    is_mainchain INTEGER NOT NULL,
                    PRIMARY KEY (spend_tx, spend_vin)
                )"
            }
        }
    }
}

pub fn create_tables(conn: &Connection) -> Result<(), StoreError> {
    for table in Table::ALL {
        conn.execute_batch(table.create_sql())?;
    }
    Ok(())
}

pub fn table_exists(conn: &Connection, table: Table) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table.name()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexDef {
    pub name: &'static str,
    pub table: Table,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

impl IndexDef {
    fn create_sql(&self) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if self.unique { "UNIQUE " } else { "" },
            self.name,
            self.table.name(),
            self.columns.join(", ")
        )
    }
}

const fn unique(name: &'static str, table: Table, columns: &'static [&'static str]) -> IndexDef {
    IndexDef {
        name,
        table,
        columns,
        unique: true,
    }
}

const fn plain(name: &'static str, table: Table, columns: &'static [&'static str]) -> IndexDef {
    IndexDef {
        name,
        table,
        columns,
        unique: false,
    }
}

pub const INDEXES: &[IndexDef] = &[
    unique("uix_block_hash", Table::Blocks, &["hash"]),
    plain("idx_block_height", Table::Blocks, &["height"]),
    unique("uix_tx_hashes", Table::Transactions, &["tx_hash", "block_hash"]),
    plain("idx_tx_block_hash", Table::Transactions, &["block_hash"]),
    unique("uix_vin", Table::Vins, &["tx_hash", "tx_index", "tx_tree"]),
    plain("idx_vin_prevout", Table::Vins, &["prev_tx_hash", "prev_tx_index"]),
    unique("uix_vout_txhash_ind", Table::Vouts, &["tx_hash", "tx_index", "tx_tree"]),
    plain("idx_vout_spend_tx_row_id", Table::Vouts, &["spend_tx_row_id"]),
    unique(
        "uix_addresses_vout_id",
        Table::Addresses,
        &["tx_vin_vout_row_id", "address", "is_funding"],
    ),
    plain("idx_addresses_address", Table::Addresses, &["address"]),
    plain("idx_addresses_tx_hash", Table::Addresses, &["tx_hash"]),
    plain(
        "idx_addresses_matching_tx_hash",
        Table::Addresses,
        &["matching_tx_hash"],
    ),
    unique("uix_ticket_hashes_index", Table::Tickets, &["tx_hash", "block_hash"]),
    plain("idx_tickets_spend_tx_db_id", Table::Tickets, &["spend_tx_db_id"]),
    plain("idx_tickets_pool_status", Table::Tickets, &["pool_status"]),
    unique("uix_votes_hashes_index", Table::Votes, &["tx_hash", "block_hash"]),
    plain("idx_votes_block_hash", Table::Votes, &["block_hash"]),
    unique("uix_misses_hashes_index", Table::Misses, &["ticket_hash", "block_hash"]),
    unique(
        "uix_agenda_votes",
        Table::AgendaVotes,
        &["votes_row_id", "agendas_row_id"],
    ),
    unique(
        "uix_tspend_votes",
        Table::TSpendVotes,
        &["votes_row_id", "tspend_hash"],
    ),
    unique("uix_treasury_hashes", Table::Treasury, &["tx_hash", "block_hash"]),
    plain("idx_swaps_height", Table::Swaps, &["spend_height"]),
];

/// Deletes all but the lowest-id row of each duplicate key group.
pub fn delete_duplicates(conn: &Connection, index: &IndexDef) -> Result<usize, StoreError> {
    let columns = index.columns.join(", ");
    let sql = format!(
        "DELETE FROM {table} WHERE id NOT IN (SELECT MIN(id) FROM {table} GROUP BY {columns})",
        table = index.table.name(),
    );
    Ok(conn.execute(&sql, [])?)
}

pub fn create_indexes(conn: &Connection) -> Result<usize, StoreError> {
    let existing = existing_indexes(conn)?;
    let mut created = 0;
    for index in INDEXES {
        if existing.iter().any(|name| name == index.name) {
            continue;
        }
        if index.unique {
            let removed = delete_duplicates(conn, index)?;
            if removed > 0 {
                log_warn!(
                    "removed {removed} duplicate rows from {} before creating {}",
                    index.table.name(),
                    index.name
                );
            }
        }
        conn.execute_batch(&index.create_sql())?;
        created += 1;
    }
    if created > 0 {
        log_info!("created {created} indexes");
    }
    Ok(created)
}

pub fn drop_indexes(conn: &Connection) -> Result<usize, StoreError> {
    let existing = existing_indexes(conn)?;
    let mut dropped = 0;
    for index in INDEXES {
        if existing.iter().any(|name| name == index.name) {
            conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", index.name))?;
            dropped += 1;
        }
    }
    if dropped > 0 {
        log_info!("dropped {dropped} indexes");
    }
    Ok(dropped)
}

/// Names of the managed indexes currently present.
pub fn existing_indexes(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'index' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names
        .into_iter()
        .filter(|name| INDEXES.iter().any(|index| index.name == name))
        .collect())
}

/// Whether every unique index needed by duplicate-checked inserts exists.
pub fn unique_indexes_present(conn: &Connection) -> Result<bool, StoreError> {
    let existing = existing_indexes(conn)?;
    Ok(INDEXES
        .iter()
        .filter(|index| index.unique)
        .all(|index| existing.iter().any(|name| name == index.name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_lifecycle() {
        let conn = Connection::open_in_memory().expect("open");
        create_tables(&conn).expect("tables");
        assert!(!unique_indexes_present(&conn).expect("check"));
        assert_eq!(create_indexes(&conn).expect("create"), INDEXES.len());
        assert!(unique_indexes_present(&conn).expect("check"));
        assert_eq!(create_indexes(&conn).expect("again"), 0);
        assert_eq!(drop_indexes(&conn).expect("drop"), INDEXES.len());
        assert!(existing_indexes(&conn).expect("list").is_empty());
    }

    #[test]
    fn duplicates_removed_before_unique_index() {
        let conn = Connection::open_in_memory().expect("open");
        create_tables(&conn).expect("tables");
        for _ in 0..3 {
            conn.execute(
                "INSERT INTO misses (height, block_hash, candidate_block_hash, ticket_hash)
                 VALUES (1, 'b', 'c', 't')",
                [],
            )
            .expect("insert");
        }
        create_indexes(&conn).expect("create");
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM misses", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 1);
    }

    #[test]
    fn every_index_targets_a_known_table() {
        let conn = Connection::open_in_memory().expect("open");
        create_tables(&conn).expect("tables");
        for table in Table::ALL {
            assert!(table_exists(&conn, table).expect("exists"), "{}", table.name());
        }
    }
}
