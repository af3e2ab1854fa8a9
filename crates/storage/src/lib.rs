//! Relational store for the chain index.
//!
//! One SQLite connection guarded by a mutex. Every call into the store runs
//! under a deadline and can be canceled from another thread; both surface as
//! dedicated [`StoreError`] variants so callers can tell them apart from
//! missing rows.

use std::fmt;

use smallvec::SmallVec;

pub mod addresses;
pub mod blocks;
pub mod meta;
pub mod rows;
pub mod schema;
mod sqlite;
pub mod stake;
pub mod swaps;
pub mod transactions;
pub mod treasury;
pub mod vins;
pub mod vouts;

pub use rows::*;
pub use schema::{IndexDef, Table};
pub use sqlite::{Store, StoreOptions};

pub use rusqlite::Connection;

/// Row ids of one transaction's inputs or outputs.
pub type RowIds = SmallVec<[i64; 4]>;

#[derive(Debug)]
pub enum StoreError {
    /// A lookup matched no row.
    NotFound,
    /// The per-query deadline elapsed.
    Timeout,
    /// The caller's cancellation flag was raised mid-query.
    Canceled,
    Sqlite(rusqlite::Error),
    Encoding(String),
    Corruption(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout | StoreError::Canceled)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "no matching row"),
            StoreError::Timeout => write!(f, "query deadline exceeded"),
            StoreError::Canceled => write!(f, "query canceled"),
            StoreError::Sqlite(err) => write!(f, "sqlite: {err}"),
            StoreError::Encoding(message) => write!(f, "encoding: {message}"),
            StoreError::Corruption(message) => write!(f, "corrupt database: {message}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(ref failure, _)
                if failure.code == rusqlite::ErrorCode::OperationInterrupted =>
            {
                sqlite::interrupt_error()
            }
            other => StoreError::Sqlite(other),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Encoding(err.to_string())
    }
}

/// How an insert treats a row whose unique key already exists.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InsertMode {
    /// No conflict handling; used for bulk loads before unique indexes exist.
    Plain,
    /// Keep the existing row and return its id.
    Skip,
    /// Overwrite the mutable columns of the existing row and return its id.
    Upsert,
}

impl InsertMode {
    pub fn from_flags(dup_checks: bool, update_existing: bool) -> Self {
        match (dup_checks, update_existing) {
            (false, _) => InsertMode::Plain,
            (true, false) => InsertMode::Skip,
            (true, true) => InsertMode::Upsert,
        }
    }
}

/// The three statement variants of one table's insert, plus the lookup used
/// when a skipped insert returns no id.
pub(crate) struct InsertSql {
    pub plain: &'static str,
    pub skip: &'static str,
    pub upsert: &'static str,
    pub select_id: &'static str,
}

impl InsertSql {
    fn for_mode(&self, mode: InsertMode) -> &'static str {
        match mode {
            InsertMode::Plain => self.plain,
            InsertMode::Skip => self.skip,
            InsertMode::Upsert => self.upsert,
        }
    }
}

pub(crate) fn insert_returning_id(
    conn: &Connection,
    sql: &InsertSql,
    mode: InsertMode,
    values: &[&dyn rusqlite::ToSql],
    key: &[&dyn rusqlite::ToSql],
) -> Result<i64, StoreError> {
    use rusqlite::OptionalExtension;

    let mut stmt = conn.prepare_cached(sql.for_mode(mode))?;
    if let Some(id) = stmt.query_row(values, |row| row.get(0)).optional()? {
        return Ok(id);
    }
    let mut select = conn.prepare_cached(sql.select_id)?;
    Ok(select.query_row(key, |row| row.get(0))?)
}

pub(crate) fn ids_json(ids: &[i64]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(ids)?)
}

pub(crate) fn ids_from_json(raw: &str) -> Result<RowIds, StoreError> {
    let ids: Vec<i64> = serde_json::from_str(raw)?;
    Ok(RowIds::from_vec(ids))
}

pub(crate) fn strings_json(values: &[String]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(values)?)
}

pub(crate) fn strings_from_json(raw: &str) -> Result<Vec<String>, StoreError> {
    Ok(serde_json::from_str(raw)?)
}

pub fn count_rows(conn: &Connection, table: Table) -> Result<i64, StoreError> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.name());
    Ok(conn.query_row(&sql, [], |row| row.get(0))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_mode_flags() {
        assert_eq!(InsertMode::from_flags(false, true), InsertMode::Plain);
        assert_eq!(InsertMode::from_flags(true, false), InsertMode::Skip);
        assert_eq!(InsertMode::from_flags(true, true), InsertMode::Upsert);
    }

    #[test]
    fn sentinels_are_distinct() {
        let not_found = StoreError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(not_found.is_not_found());
        assert!(!not_found.is_timeout());
        assert!(StoreError::Canceled.is_timeout());
        assert!(!StoreError::Timeout.is_not_found());
    }
}
