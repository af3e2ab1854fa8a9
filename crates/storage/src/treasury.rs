//! `treasury` rows.

use rusqlite::{params, Connection};

use crate::{insert_returning_id, InsertMode, InsertSql, StoreError, TreasuryRow};

const INSERT_TREASURY: InsertSql = InsertSql {
    plain: "INSERT INTO treasury (tx_hash, tx_type, value, block_hash, block_height, block_time,
            is_mainchain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        RETURNING id",
    skip: "INSERT INTO treasury (tx_hash, tx_type, value, block_hash, block_height, block_time,
            is_mainchain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT (tx_hash, block_hash) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO treasury (tx_hash, tx_type, value, block_hash, block_height, block_time,
            is_mainchain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT (tx_hash, block_hash) DO UPDATE SET
            is_mainchain = excluded.is_mainchain
        RETURNING id",
    select_id: "SELECT id FROM treasury WHERE tx_hash = ?1 AND block_hash = ?2",
};

pub fn insert_treasury(conn: &Connection, row: &TreasuryRow, mode: InsertMode) -> Result<i64, StoreError> {
    insert_returning_id(
        conn,
        &INSERT_TREASURY,
        mode,
        params![
            row.tx_hash,
            row.tx_type,
            row.value,
            row.block_hash,
            row.block_height,
            row.block_time,
            row.is_mainchain,
        ],
        params![row.tx_hash, row.block_hash],
    )
}

pub fn set_mainchain_by_block(conn: &Connection, block_hash: &str, mainchain: bool) -> Result<usize, StoreError> {
    Ok(conn
        .prepare_cached("UPDATE treasury SET is_mainchain = ?2 WHERE block_hash = ?1")?
        .execute(params![block_hash, mainchain])?)
}

/// Net treasury balance over main-chain rows.
pub fn balance(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn
        .prepare_cached("SELECT COALESCE(SUM(value), 0) FROM treasury WHERE is_mainchain = 1")?
        .query_row([], |row| row.get(0))?)
}

pub fn delete_by_block(conn: &Connection, block_hash: &str) -> Result<usize, StoreError> {
    Ok(conn
        .prepare_cached("DELETE FROM treasury WHERE block_hash = ?1")?
        .execute([block_hash])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::tests::conn;

    fn row(tx_hash: &str, tx_type: i16, value: i64) -> TreasuryRow {
        TreasuryRow {
            tx_hash: tx_hash.into(),
            tx_type,
            value,
            block_hash: "b1".into(),
            block_height: 1,
            block_time: 5,
            is_mainchain: true,
        }
    }

    #[test]
    fn balance_nets_spends() {
        let conn = conn();
        insert_treasury(&conn, &row("base", 6, 1_000), InsertMode::Skip).expect("base");
        insert_treasury(&conn, &row("add", 4, 250), InsertMode::Skip).expect("add");
        insert_treasury(&conn, &row("spend", 5, -400), InsertMode::Skip).expect("spend");
        insert_treasury(&conn, &row("spend", 5, -400), InsertMode::Skip).expect("dup");
        assert_eq!(balance(&conn).expect("balance"), 850);

        set_mainchain_by_block(&conn, "b1", false).expect("flip");
        assert_eq!(balance(&conn).expect("balance"), 0);
        assert_eq!(delete_by_block(&conn, "b1").expect("delete"), 3);
    }
}
