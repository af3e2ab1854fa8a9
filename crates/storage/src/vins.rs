//! `vins` rows.

use rusqlite::{params, Connection};

use crate::{ids_json, insert_returning_id, InsertMode, InsertSql, StoreError, VinRow};

const INSERT_VIN: InsertSql = InsertSql {
    plain: "INSERT INTO vins (tx_hash, tx_index, tx_tree, is_valid, is_mainchain, block_time,
            prev_tx_hash, prev_tx_index, prev_tx_tree, value_in, tx_type)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        RETURNING id",
    skip: "INSERT INTO vins (tx_hash, tx_index, tx_tree, is_valid, is_mainchain, block_time,
            prev_tx_hash, prev_tx_index, prev_tx_tree, value_in, tx_type)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT (tx_hash, tx_index, tx_tree) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO vins (tx_hash, tx_index, tx_tree, is_valid, is_mainchain, block_time,
            prev_tx_hash, prev_tx_index, prev_tx_tree, value_in, tx_type)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        ON CONFLICT (tx_hash, tx_index, tx_tree) DO UPDATE SET
            is_valid = excluded.is_valid,
            is_mainchain = excluded.is_mainchain,
            block_time = excluded.block_time,
            prev_tx_hash = excluded.prev_tx_hash,
            prev_tx_index = excluded.prev_tx_index,
            prev_tx_tree = excluded.prev_tx_tree,
            value_in = excluded.value_in,
            tx_type = excluded.tx_type
        RETURNING id",
    select_id: "SELECT id FROM vins WHERE tx_hash = ?1 AND tx_index = ?2 AND tx_tree = ?3",
};

pub fn insert_vin(conn: &Connection, vin: &VinRow, mode: InsertMode) -> Result<i64, StoreError> {
    insert_returning_id(
        conn,
        &INSERT_VIN,
        mode,
        params![
            vin.tx_hash,
            vin.tx_index,
            vin.tx_tree,
            vin.is_valid,
            vin.is_mainchain,
            vin.block_time,
            vin.prev_tx_hash,
            vin.prev_tx_index,
            vin.prev_tx_tree,
            vin.value_in,
            vin.tx_type,
        ],
        params![vin.tx_hash, vin.tx_index, vin.tx_tree],
    )
}

pub fn set_mainchain_by_ids(conn: &Connection, ids: &[i64], mainchain: bool) -> Result<usize, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    Ok(conn
        .prepare_cached(
            "UPDATE vins SET is_mainchain = ?2 WHERE id IN (SELECT value FROM json_each(?1))",
        )?
        .execute(params![ids_json(ids)?, mainchain])?)
}

pub fn set_valid_by_ids(conn: &Connection, ids: &[i64], valid: bool) -> Result<usize, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    Ok(conn
        .prepare_cached("UPDATE vins SET is_valid = ?2 WHERE id IN (SELECT value FROM json_each(?1))")?
        .execute(params![ids_json(ids)?, valid])?)
}

pub fn load_vins(conn: &Connection, ids: &[i64]) -> Result<Vec<(i64, VinRow)>, StoreError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare_cached(
        "SELECT id, tx_hash, tx_index, tx_tree, is_valid, is_mainchain, block_time, prev_tx_hash,
                prev_tx_index, prev_tx_tree, value_in, tx_type
         FROM vins WHERE id IN (SELECT value FROM json_each(?1)) ORDER BY id",
    )?;
    let rows = stmt.query_map([ids_json(ids)?], |row| {
        Ok((
            row.get(0)?,
            VinRow {
                tx_hash: row.get(1)?,
                tx_index: row.get(2)?,
                tx_tree: row.get(3)?,
                is_valid: row.get(4)?,
                is_mainchain: row.get(5)?,
                block_time: row.get(6)?,
                prev_tx_hash: row.get(7)?,
                prev_tx_index: row.get(8)?,
                prev_tx_tree: row.get(9)?,
                value_in: row.get(10)?,
                tx_type: row.get(11)?,
            },
        ))
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn delete_by_ids(conn: &Connection, ids: &[i64]) -> Result<usize, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    Ok(conn
        .prepare_cached("DELETE FROM vins WHERE id IN (SELECT value FROM json_each(?1))")?
        .execute([ids_json(ids)?])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::tests::conn;

    fn vin(index: u32) -> VinRow {
        VinRow {
            tx_hash: "t1".into(),
            tx_index: index,
            tx_tree: 0,
            is_valid: true,
            is_mainchain: true,
            block_time: 10,
            prev_tx_hash: "t0".into(),
            prev_tx_index: index,
            prev_tx_tree: 0,
            value_in: 100,
            tx_type: 0,
        }
    }

    #[test]
    fn flags_follow_id_lists() {
        let conn = conn();
        let a = insert_vin(&conn, &vin(0), InsertMode::Skip).expect("a");
        let b = insert_vin(&conn, &vin(1), InsertMode::Skip).expect("b");
        assert_eq!(insert_vin(&conn, &vin(1), InsertMode::Skip).expect("dup"), b);

        assert_eq!(set_mainchain_by_ids(&conn, &[a, b], false).expect("flip"), 2);
        assert_eq!(set_valid_by_ids(&conn, &[b], false).expect("invalidate"), 1);
        let rows = load_vins(&conn, &[a, b]).expect("load");
        assert!(!rows[0].1.is_mainchain && rows[0].1.is_valid);
        assert!(!rows[1].1.is_valid);

        assert_eq!(set_valid_by_ids(&conn, &[], true).expect("empty"), 0);
        assert_eq!(delete_by_ids(&conn, &[a, b]).expect("delete"), 2);
    }
}
