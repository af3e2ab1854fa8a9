//! `vouts` rows and the spend linkage stored on them.

use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    ids_json, insert_returning_id, strings_from_json, strings_json, InsertMode, InsertSql,
    StoreError, UtxoRecord, VoutRow,
};

const INSERT_VOUT: InsertSql = InsertSql {
    plain: "INSERT INTO vouts (tx_hash, tx_index, tx_tree, value, version, pkscript,
            script_req_sigs, script_type, script_addresses, mixed)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        RETURNING id",
    skip: "INSERT INTO vouts (tx_hash, tx_index, tx_tree, value, version, pkscript,
            script_req_sigs, script_type, script_addresses, mixed)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT (tx_hash, tx_index, tx_tree) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO vouts (tx_hash, tx_index, tx_tree, value, version, pkscript,
            script_req_sigs, script_type, script_addresses, mixed)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT (tx_hash, tx_index, tx_tree) DO UPDATE SET
            version = excluded.version,
            mixed = excluded.mixed
        RETURNING id",
    select_id: "SELECT id FROM vouts WHERE tx_hash = ?1 AND tx_index = ?2 AND tx_tree = ?3",
};

pub fn insert_vout(conn: &Connection, vout: &VoutRow, mode: InsertMode) -> Result<i64, StoreError> {
    let addresses = strings_json(&vout.script_addresses)?;
    insert_returning_id(
        conn,
        &INSERT_VOUT,
        mode,
        params![
            vout.tx_hash,
            vout.tx_index,
            vout.tx_tree,
            vout.value,
            vout.version,
            vout.pk_script,
            vout.script_req_sigs,
            vout.script_type,
            addresses,
            vout.mixed,
        ],
        params![vout.tx_hash, vout.tx_index, vout.tx_tree],
    )
}

/// Funding output for an outpoint, whichever block it was stored under.
pub fn utxo_by_outpoint(
    conn: &Connection,
    tx_hash: &str,
    index: u32,
    tree: i16,
) -> Result<Option<UtxoRecord>, StoreError> {
    let row = conn
        .prepare_cached(
            "SELECT id, value, script_addresses, mixed FROM vouts
             WHERE tx_hash = ?1 AND tx_index = ?2 AND tx_tree = ?3",
        )?
        .query_row(params![tx_hash, index, tree], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })
        .optional()?;
    row.map(|(vout_id, value, addresses, mixed)| {
        Ok(UtxoRecord {
            vout_id,
            value,
            addresses: strings_from_json(&addresses)?,
            mixed,
        })
    })
    .transpose()
}

pub fn vout_mixed(conn: &Connection, tx_hash: &str, index: u32, tree: i16) -> Result<Option<bool>, StoreError> {
    Ok(conn
        .prepare_cached(
            "SELECT mixed FROM vouts WHERE tx_hash = ?1 AND tx_index = ?2 AND tx_tree = ?3",
        )?
        .query_row(params![tx_hash, index, tree], |row| row.get(0))
        .optional()?)
}

/// Points the funding output at the transaction row that spends it.
pub fn set_spending(conn: &Connection, vout_id: i64, spend_tx_row_id: i64) -> Result<(), StoreError> {
    conn.prepare_cached("UPDATE vouts SET spend_tx_row_id = ?2 WHERE id = ?1")?
        .execute(params![vout_id, spend_tx_row_id])?;
    Ok(())
}

/// Clears spend linkage that points at any of the given transaction rows.
pub fn clear_spending_by_spenders(conn: &Connection, spender_tx_ids: &[i64]) -> Result<usize, StoreError> {
    if spender_tx_ids.is_empty() {
        return Ok(0);
    }
    Ok(conn
        .prepare_cached(
            "UPDATE vouts SET spend_tx_row_id = NULL
             WHERE spend_tx_row_id IN (SELECT value FROM json_each(?1))",
        )?
        .execute([ids_json(spender_tx_ids)?])?)
}

pub fn spend_tx_row_id(conn: &Connection, vout_id: i64) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .prepare_cached("SELECT spend_tx_row_id FROM vouts WHERE id = ?1")?
        .query_row([vout_id], |row| row.get(0))?)
}

/// Every output with no recorded spender, as outpoint keys with cache data.
pub fn unspent_outputs(conn: &Connection) -> Result<Vec<(String, u32, i16, UtxoRecord)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT vouts.id, vouts.tx_hash, vouts.tx_index, vouts.tx_tree, vouts.value,
                vouts.script_addresses, vouts.mixed
         FROM vouts
         WHERE vouts.spend_tx_row_id IS NULL AND vouts.value > 0
           AND EXISTS (SELECT 1 FROM transactions t
                       WHERE t.tx_hash = vouts.tx_hash AND t.is_mainchain = 1 AND t.is_valid = 1)",
    )?;
    let raw = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, i16>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, bool>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    raw.into_iter()
        .map(|(vout_id, hash, index, tree, value, addresses, mixed)| {
            Ok((
                hash,
                index,
                tree,
                UtxoRecord {
                    vout_id,
                    value,
                    addresses: strings_from_json(&addresses)?,
                    mixed,
                },
            ))
        })
        .collect()
}

pub fn delete_by_ids(conn: &Connection, ids: &[i64]) -> Result<usize, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    Ok(conn
        .prepare_cached("DELETE FROM vouts WHERE id IN (SELECT value FROM json_each(?1))")?
        .execute([ids_json(ids)?])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::tests::conn;

    fn vout(index: u32, value: i64) -> VoutRow {
        VoutRow {
            tx_hash: "t1".into(),
            tx_index: index,
            tx_tree: 0,
            value,
            version: 0,
            pk_script: vec![0x76, 0xa9],
            script_req_sigs: 1,
            script_type: "pubkeyhash".into(),
            script_addresses: vec!["Addr1".into()],
            mixed: false,
        }
    }

    #[test]
    fn spend_linkage_round_trip() {
        let conn = conn();
        let id = insert_vout(&conn, &vout(0, 500), InsertMode::Skip).expect("insert");
        let utxo = utxo_by_outpoint(&conn, "t1", 0, 0).expect("lookup").expect("row");
        assert_eq!(utxo.vout_id, id);
        assert_eq!(utxo.addresses, vec!["Addr1".to_string()]);
        assert!(utxo_by_outpoint(&conn, "t1", 0, 1).expect("lookup").is_none());

        set_spending(&conn, id, 42).expect("spend");
        assert_eq!(spend_tx_row_id(&conn, id).expect("spender"), Some(42));
        assert_eq!(clear_spending_by_spenders(&conn, &[42]).expect("clear"), 1);
        assert_eq!(spend_tx_row_id(&conn, id).expect("spender"), None);
    }

    #[test]
    fn upsert_refreshes_mixed_flag() {
        let conn = conn();
        let id = insert_vout(&conn, &vout(0, 500), InsertMode::Skip).expect("insert");
        let mut mixed = vout(0, 500);
        mixed.mixed = true;
        assert_eq!(insert_vout(&conn, &mixed, InsertMode::Skip).expect("skip"), id);
        assert_eq!(vout_mixed(&conn, "t1", 0, 0).expect("mixed"), Some(false));
        assert_eq!(insert_vout(&conn, &mixed, InsertMode::Upsert).expect("upsert"), id);
        assert_eq!(vout_mixed(&conn, "t1", 0, 0).expect("mixed"), Some(true));
    }
}
