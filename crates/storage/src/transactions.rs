//! `transactions` rows.

use rusqlite::{params, Connection, OptionalExtension};

use crate::{ids_from_json, ids_json, insert_returning_id, InsertMode, InsertSql, StoreError, TxRow, TxRowRef};

const INSERT_TX: InsertSql = InsertSql {
    plain: "INSERT INTO transactions (block_hash, block_height, block_time, tx_type, version,
            tree, tx_hash, block_index, lock_time, expiry, size, spent, sent, fees, mix_count,
            mix_denom, num_vin, vin_db_ids, num_vout, vout_db_ids, is_valid, is_mainchain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
            ?19, ?20, ?21, ?22)
        RETURNING id",
    skip: "INSERT INTO transactions (block_hash, block_height, block_time, tx_type, version,
            tree, tx_hash, block_index, lock_time, expiry, size, spent, sent, fees, mix_count,
            mix_denom, num_vin, vin_db_ids, num_vout, vout_db_ids, is_valid, is_mainchain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
            ?19, ?20, ?21, ?22)
        ON CONFLICT (tx_hash, block_hash) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO transactions (block_hash, block_height, block_time, tx_type, version,
            tree, tx_hash, block_index, lock_time, expiry, size, spent, sent, fees, mix_count,
            mix_denom, num_vin, vin_db_ids, num_vout, vout_db_ids, is_valid, is_mainchain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
            ?19, ?20, ?21, ?22)
        ON CONFLICT (tx_hash, block_hash) DO UPDATE SET
            block_index = excluded.block_index,
            spent = excluded.spent,
            fees = excluded.fees,
            mix_count = excluded.mix_count,
            mix_denom = excluded.mix_denom,
            vin_db_ids = excluded.vin_db_ids,
            vout_db_ids = excluded.vout_db_ids,
            is_valid = excluded.is_valid,
            is_mainchain = excluded.is_mainchain
        RETURNING id",
    select_id: "SELECT id FROM transactions WHERE tx_hash = ?1 AND block_hash = ?2",
};

pub fn insert_transaction(conn: &Connection, tx: &TxRow, mode: InsertMode) -> Result<i64, StoreError> {
    let vin_ids = ids_json(&tx.vin_db_ids)?;
    let vout_ids = ids_json(&tx.vout_db_ids)?;
    insert_returning_id(
        conn,
        &INSERT_TX,
        mode,
        params![
            tx.block_hash,
            tx.block_height,
            tx.block_time,
            tx.tx_type,
            tx.version,
            tx.tree,
            tx.tx_hash,
            tx.block_index,
            tx.lock_time,
            tx.expiry,
            tx.size,
            tx.spent,
            tx.sent,
            tx.fees,
            tx.mix_count,
            tx.mix_denom,
            tx.vin_db_ids.len() as i64,
            vin_ids,
            tx.vout_db_ids.len() as i64,
            vout_ids,
            tx.is_valid,
            tx.is_mainchain,
        ],
        params![tx.tx_hash, tx.block_hash],
    )
}

fn row_ref(row: &rusqlite::Row<'_>) -> rusqlite::Result<(i64, String, i16, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_refs(raw: Vec<(i64, String, i16, String, String)>) -> Result<Vec<TxRowRef>, StoreError> {
    raw.into_iter()
        .map(|(id, tx_hash, tree, vins, vouts)| {
            Ok(TxRowRef {
                id,
                tx_hash,
                tree,
                vin_ids: ids_from_json(&vins)?,
                vout_ids: ids_from_json(&vouts)?,
            })
        })
        .collect()
}

/// Sets the main-chain flag of every transaction in the block, returning
/// their row ids with their input and output ids. Validity is the block's
/// validity for stake transactions and for regular ones.
pub fn set_mainchain_by_block(
    conn: &Connection,
    block_hash: &str,
    mainchain: bool,
) -> Result<Vec<TxRowRef>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "UPDATE transactions SET is_mainchain = ?2 WHERE block_hash = ?1
         RETURNING id, tx_hash, tree, vin_db_ids, vout_db_ids",
    )?;
    let raw = stmt
        .query_map(params![block_hash, mainchain], row_ref)?
        .collect::<Result<Vec<_>, _>>()?;
    decode_refs(raw)
}

/// Sets validity of the block's regular-tree transactions, returning their refs.
pub fn set_valid_regular_by_block(
    conn: &Connection,
    block_hash: &str,
    valid: bool,
) -> Result<Vec<TxRowRef>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "UPDATE transactions SET is_valid = ?2 WHERE block_hash = ?1 AND tree = 0
         RETURNING id, tx_hash, tree, vin_db_ids, vout_db_ids",
    )?;
    let raw = stmt
        .query_map(params![block_hash, valid], row_ref)?
        .collect::<Result<Vec<_>, _>>()?;
    decode_refs(raw)
}

pub fn tx_refs_in_block(conn: &Connection, block_hash: &str) -> Result<Vec<TxRowRef>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT id, tx_hash, tree, vin_db_ids, vout_db_ids FROM transactions
         WHERE block_hash = ?1 ORDER BY tree, block_index",
    )?;
    let raw = stmt
        .query_map([block_hash], row_ref)?
        .collect::<Result<Vec<_>, _>>()?;
    decode_refs(raw)
}

pub fn tx_row_id(conn: &Connection, tx_hash: &str, block_hash: &str) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .prepare_cached("SELECT id FROM transactions WHERE tx_hash = ?1 AND block_hash = ?2")?
        .query_row([tx_hash, block_hash], |row| row.get(0))
        .optional()?)
}

/// Row id of the valid main-chain copy of a transaction.
pub fn mainchain_tx_row_id(conn: &Connection, tx_hash: &str) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .prepare_cached(
            "SELECT id FROM transactions WHERE tx_hash = ?1 AND is_mainchain = 1 AND is_valid = 1
             ORDER BY id DESC LIMIT 1",
        )?
        .query_row([tx_hash], |row| row.get(0))
        .optional()?)
}

/// How many blocks other than `block_hash` also contain the transaction.
pub fn count_other_blocks(conn: &Connection, tx_hash: &str, block_hash: &str) -> Result<i64, StoreError> {
    Ok(conn
        .prepare_cached(
            "SELECT COUNT(*) FROM transactions WHERE tx_hash = ?1 AND block_hash != ?2",
        )?
        .query_row([tx_hash, block_hash], |row| row.get(0))?)
}

pub fn load_transaction(
    conn: &Connection,
    tx_hash: &str,
    block_hash: &str,
) -> Result<Option<TxRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT block_hash, block_height, block_time, tx_type, version, tree, tx_hash,
                    block_index, lock_time, expiry, size, spent, sent, fees, mix_count, mix_denom,
                    vin_db_ids, vout_db_ids, is_valid, is_mainchain
             FROM transactions WHERE tx_hash = ?1 AND block_hash = ?2",
            [tx_hash, block_hash],
            |row| {
                Ok((
                    TxRow {
                        block_hash: row.get(0)?,
                        block_height: row.get(1)?,
                        block_time: row.get(2)?,
                        tx_type: row.get(3)?,
                        version: row.get(4)?,
                        tree: row.get(5)?,
                        tx_hash: row.get(6)?,
                        block_index: row.get(7)?,
                        lock_time: row.get(8)?,
                        expiry: row.get(9)?,
                        size: row.get(10)?,
                        spent: row.get(11)?,
                        sent: row.get(12)?,
                        fees: row.get(13)?,
                        mix_count: row.get(14)?,
                        mix_denom: row.get(15)?,
                        vin_db_ids: Default::default(),
                        vout_db_ids: Default::default(),
                        is_valid: row.get(18)?,
                        is_mainchain: row.get(19)?,
                    },
                    row.get::<_, String>(16)?,
                    row.get::<_, String>(17)?,
                ))
            },
        )
        .optional()?;
    let Some((mut tx, vins, vouts)) = row else {
        return Ok(None);
    };
    tx.vin_db_ids = ids_from_json(&vins)?;
    tx.vout_db_ids = ids_from_json(&vouts)?;
    Ok(Some(tx))
}

pub fn delete_by_block(conn: &Connection, block_hash: &str) -> Result<usize, StoreError> {
    Ok(conn
        .prepare_cached("DELETE FROM transactions WHERE block_hash = ?1")?
        .execute([block_hash])?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::blocks::tests::conn;
    use crate::RowIds;

    pub(crate) fn tx(hash: &str, block: &str, tree: i16) -> TxRow {
        TxRow {
            block_hash: block.into(),
            block_height: 5,
            block_time: 1_600_000_000,
            tx_type: 0,
            version: 1,
            tree,
            tx_hash: hash.into(),
            block_index: 0,
            lock_time: 0,
            expiry: 0,
            size: 200,
            spent: 5_000,
            sent: 4_000,
            fees: 1_000,
            mix_count: 0,
            mix_denom: 0,
            vin_db_ids: RowIds::from_slice(&[1]),
            vout_db_ids: RowIds::from_slice(&[2, 3]),
            is_valid: true,
            is_mainchain: true,
        }
    }

    #[test]
    fn upsert_updates_flags_and_keeps_id() {
        let conn = conn();
        let id = insert_transaction(&conn, &tx("t1", "b1", 0), InsertMode::Skip).expect("insert");
        let mut side = tx("t1", "b1", 0);
        side.is_mainchain = false;
        assert_eq!(insert_transaction(&conn, &side, InsertMode::Skip).expect("skip"), id);
        assert!(load_transaction(&conn, "t1", "b1").expect("load").expect("row").is_mainchain);
        assert_eq!(insert_transaction(&conn, &side, InsertMode::Upsert).expect("upsert"), id);
        let loaded = load_transaction(&conn, "t1", "b1").expect("load").expect("row");
        assert!(!loaded.is_mainchain);
        assert_eq!(loaded.vout_db_ids.as_slice(), &[2, 3]);
    }

    #[test]
    fn block_level_flag_updates_return_refs() {
        let conn = conn();
        insert_transaction(&conn, &tx("t1", "b1", 0), InsertMode::Skip).expect("t1");
        insert_transaction(&conn, &tx("t2", "b1", 1), InsertMode::Skip).expect("t2");
        insert_transaction(&conn, &tx("t1", "b2", 0), InsertMode::Skip).expect("t1 b2");

        let refs = set_mainchain_by_block(&conn, "b1", false).expect("flip");
        assert_eq!(refs.len(), 2);
        let regular = set_valid_regular_by_block(&conn, "b1", false).expect("invalidate");
        assert_eq!(regular.len(), 1);
        assert_eq!(regular[0].tx_hash, "t1");
        assert_eq!(regular[0].vin_ids.as_slice(), &[1]);

        assert_eq!(count_other_blocks(&conn, "t1", "b1").expect("count"), 1);
        assert_eq!(mainchain_tx_row_id(&conn, "t2").expect("lookup"), None);
        assert!(mainchain_tx_row_id(&conn, "t1").expect("lookup").is_some());
        assert_eq!(delete_by_block(&conn, "b1").expect("delete"), 2);
    }
}
