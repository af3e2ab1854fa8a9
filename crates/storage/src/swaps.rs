//! `swaps` rows: atomic swap contract redemptions and refunds.
//!
//! The table has no integer id; the spending input is the key.

use rusqlite::{params, Connection, OptionalExtension};

use crate::{InsertMode, StoreError, SwapRow};

const INSERT_PLAIN: &str = "INSERT INTO swaps (contract_tx, contract_vout, spend_tx, spend_vin,
        spend_height, spend_block_hash, p2sh_addr, value, secret_hash, secret, lock_time,
        is_refund, is_mainchain)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)";

const INSERT_SKIP: &str = "INSERT INTO swaps (contract_tx, contract_vout, spend_tx, spend_vin,
        spend_height, spend_block_hash, p2sh_addr, value, secret_hash, secret, lock_time,
        is_refund, is_mainchain)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
    ON CONFLICT (spend_tx, spend_vin) DO NOTHING";

const INSERT_UPSERT: &str = "INSERT INTO swaps (contract_tx, contract_vout, spend_tx, spend_vin,
        spend_height, spend_block_hash, p2sh_addr, value, secret_hash, secret, lock_time,
        is_refund, is_mainchain)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
    ON CONFLICT (spend_tx, spend_vin) DO UPDATE SET
        spend_height = excluded.spend_height,
        spend_block_hash = excluded.spend_block_hash,
        is_mainchain = excluded.is_mainchain";

/// Returns whether a row was written.
pub fn insert_swap(conn: &Connection, swap: &SwapRow, mode: InsertMode) -> Result<bool, StoreError> {
    let sql = match mode {
        InsertMode::Plain => INSERT_PLAIN,
        InsertMode::Skip => INSERT_SKIP,
        InsertMode::Upsert => INSERT_UPSERT,
    };
    let written = conn.prepare_cached(sql)?.execute(params![
        swap.contract_tx,
        swap.contract_vout,
        swap.spend_tx,
        swap.spend_vin,
        swap.spend_height,
        swap.spend_block_hash,
        swap.p2sh_addr,
        swap.value,
        swap.secret_hash,
        swap.secret,
        swap.lock_time,
        swap.is_refund,
        swap.is_mainchain,
    ])?;
    Ok(written > 0)
}

pub fn set_mainchain_by_block(conn: &Connection, block_hash: &str, mainchain: bool) -> Result<usize, StoreError> {
    Ok(conn
        .prepare_cached("UPDATE swaps SET is_mainchain = ?2 WHERE spend_block_hash = ?1")?
        .execute(params![block_hash, mainchain])?)
}

pub fn swap_by_spend(conn: &Connection, spend_tx: &str, spend_vin: u32) -> Result<Option<SwapRow>, StoreError> {
    Ok(conn
        .prepare_cached(
            "SELECT contract_tx, contract_vout, spend_tx, spend_vin, spend_height, spend_block_hash,
                    p2sh_addr, value, secret_hash, secret, lock_time, is_refund, is_mainchain
             FROM swaps WHERE spend_tx = ?1 AND spend_vin = ?2",
        )?
        .query_row(params![spend_tx, spend_vin], |row| {
            Ok(SwapRow {
                contract_tx: row.get(0)?,
                contract_vout: row.get(1)?,
                spend_tx: row.get(2)?,
                spend_vin: row.get(3)?,
                spend_height: row.get(4)?,
                spend_block_hash: row.get(5)?,
                p2sh_addr: row.get(6)?,
                value: row.get(7)?,
                secret_hash: row.get(8)?,
                secret: row.get(9)?,
                lock_time: row.get(10)?,
                is_refund: row.get(11)?,
                is_mainchain: row.get(12)?,
            })
        })
        .optional()?)
}

pub fn delete_by_block(conn: &Connection, block_hash: &str) -> Result<usize, StoreError> {
    Ok(conn
        .prepare_cached("DELETE FROM swaps WHERE spend_block_hash = ?1")?
        .execute([block_hash])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::tests::conn;

    fn swap(block: &str, secret: Option<Vec<u8>>) -> SwapRow {
        SwapRow {
            contract_tx: "contract".into(),
            contract_vout: 0,
            spend_tx: "redeem".into(),
            spend_vin: 0,
            spend_height: 20,
            spend_block_hash: block.into(),
            p2sh_addr: "Dc1".into(),
            value: 10_000,
            secret_hash: vec![1; 32],
            is_refund: secret.is_none(),
            secret,
            lock_time: 1_700_000_000,
            is_mainchain: true,
        }
    }

    #[test]
    fn upsert_moves_swap_to_new_block() {
        let conn = conn();
        assert!(insert_swap(&conn, &swap("b20", Some(vec![9; 32])), InsertMode::Skip).expect("insert"));
        assert!(!insert_swap(&conn, &swap("b21", Some(vec![9; 32])), InsertMode::Skip).expect("skip"));
        assert!(insert_swap(&conn, &swap("b21", Some(vec![9; 32])), InsertMode::Upsert).expect("upsert"));
        let stored = swap_by_spend(&conn, "redeem", 0).expect("lookup").expect("row");
        assert_eq!(stored.spend_block_hash, "b21");
        assert_eq!(stored.secret.as_deref(), Some(&[9u8; 32][..]));
        assert!(!stored.is_refund);

        assert_eq!(set_mainchain_by_block(&conn, "b21", false).expect("flip"), 1);
        assert_eq!(delete_by_block(&conn, "b21").expect("delete"), 1);
    }
}
