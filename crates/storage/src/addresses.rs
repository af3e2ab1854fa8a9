//! `addresses` rows: one funding row per (output, address) and one spending
//! row per (input, address).

use rusqlite::{params, Connection};

use crate::{ids_json, insert_returning_id, AddressBalance, AddressRow, InsertMode, InsertSql, StoreError};

const INSERT_ADDRESS: InsertSql = InsertSql {
    plain: "INSERT INTO addresses (address, tx_hash, valid_mainchain, matching_tx_hash, value,
            block_time, is_funding, tx_vin_vout_index, tx_vin_vout_row_id, tx_type)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        RETURNING id",
    skip: "INSERT INTO addresses (address, tx_hash, valid_mainchain, matching_tx_hash, value,
            block_time, is_funding, tx_vin_vout_index, tx_vin_vout_row_id, tx_type)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT (tx_vin_vout_row_id, address, is_funding) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO addresses (address, tx_hash, valid_mainchain, matching_tx_hash, value,
            block_time, is_funding, tx_vin_vout_index, tx_vin_vout_row_id, tx_type)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT (tx_vin_vout_row_id, address, is_funding) DO UPDATE SET
            tx_hash = excluded.tx_hash,
            tx_vin_vout_index = excluded.tx_vin_vout_index,
            block_time = excluded.block_time,
            valid_mainchain = excluded.valid_mainchain,
            matching_tx_hash = COALESCE(NULLIF(excluded.matching_tx_hash, ''),
                                        addresses.matching_tx_hash)
        RETURNING id",
    select_id: "SELECT id FROM addresses
        WHERE tx_vin_vout_row_id = ?1 AND address = ?2 AND is_funding = ?3",
};

pub fn insert_address_row(conn: &Connection, row: &AddressRow, mode: InsertMode) -> Result<i64, StoreError> {
    insert_returning_id(
        conn,
        &INSERT_ADDRESS,
        mode,
        params![
            row.address,
            row.tx_hash,
            row.valid_mainchain,
            row.matching_tx_hash,
            row.value,
            row.block_time,
            row.is_funding,
            row.tx_vin_vout_index,
            row.tx_vin_vout_row_id,
            row.tx_type,
        ],
        params![row.tx_vin_vout_row_id, row.address, row.is_funding],
    )
}

/// Marks the funding rows of an output as spent by `spending_tx_hash`.
/// Returns the addresses touched.
pub fn set_matching_tx_for_vout(
    conn: &Connection,
    vout_id: i64,
    spending_tx_hash: &str,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "UPDATE addresses SET matching_tx_hash = ?2
         WHERE tx_vin_vout_row_id = ?1 AND is_funding = 1
         RETURNING address",
    )?;
    let rows = stmt.query_map(params![vout_id, spending_tx_hash], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Clears the spend marker of funding rows spent by any of `spender_hashes`.
pub fn clear_matching_for_spenders(
    conn: &Connection,
    spender_hashes: &[String],
) -> Result<Vec<String>, StoreError> {
    if spender_hashes.is_empty() {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare_cached(
        "UPDATE addresses SET matching_tx_hash = ''
         WHERE is_funding = 1 AND matching_tx_hash IN (SELECT value FROM json_each(?1))
         RETURNING address",
    )?;
    let json = serde_json::to_string(spender_hashes)?;
    let rows = stmt.query_map([json], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Sets `valid_mainchain` on the funding rows of the given outputs and the
/// spending rows of the given inputs. Returns the addresses touched.
pub fn set_valid_mainchain(
    conn: &Connection,
    vout_ids: &[i64],
    vin_ids: &[i64],
    valid_mainchain: bool,
) -> Result<Vec<String>, StoreError> {
    let mut touched = Vec::new();
    for (ids, funding) in [(vout_ids, true), (vin_ids, false)] {
        if ids.is_empty() {
            continue;
        }
        let mut stmt = conn.prepare_cached(
            "UPDATE addresses SET valid_mainchain = ?3
             WHERE is_funding = ?2 AND tx_vin_vout_row_id IN (SELECT value FROM json_each(?1))
             RETURNING address",
        )?;
        let rows = stmt.query_map(params![ids_json(ids)?, funding, valid_mainchain], |row| {
            row.get::<_, String>(0)
        })?;
        for address in rows {
            touched.push(address?);
        }
    }
    touched.sort();
    touched.dedup();
    Ok(touched)
}

pub fn rows_for_address(conn: &Connection, address: &str) -> Result<Vec<AddressRow>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT address, tx_hash, valid_mainchain, matching_tx_hash, value, block_time,
                is_funding, tx_vin_vout_index, tx_vin_vout_row_id, tx_type
         FROM addresses WHERE address = ?1 ORDER BY block_time, id",
    )?;
    let rows = stmt.query_map([address], |row| {
        Ok(AddressRow {
            address: row.get(0)?,
            tx_hash: row.get(1)?,
            valid_mainchain: row.get(2)?,
            matching_tx_hash: row.get(3)?,
            value: row.get(4)?,
            block_time: row.get(5)?,
            is_funding: row.get(6)?,
            tx_vin_vout_index: row.get(7)?,
            tx_vin_vout_row_id: row.get(8)?,
            tx_type: row.get(9)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Spent and unspent totals over valid main-chain funding rows.
pub fn balance(conn: &Connection, address: &str) -> Result<AddressBalance, StoreError> {
    let (num_spent, num_unspent, total_spent, total_unspent) = conn
        .prepare_cached(
            "SELECT
                COALESCE(SUM(matching_tx_hash != ''), 0),
                COALESCE(SUM(matching_tx_hash = ''), 0),
                COALESCE(SUM(CASE WHEN matching_tx_hash != '' THEN value ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN matching_tx_hash = '' THEN value ELSE 0 END), 0)
             FROM addresses
             WHERE address = ?1 AND is_funding = 1 AND valid_mainchain = 1",
        )?
        .query_row([address], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
    Ok(AddressBalance {
        address: address.to_string(),
        num_spent,
        num_unspent,
        total_spent,
        total_unspent,
    })
}

pub fn delete_by_row_ids(conn: &Connection, vout_ids: &[i64], vin_ids: &[i64]) -> Result<usize, StoreError> {
    let mut deleted = 0;
    for (ids, funding) in [(vout_ids, true), (vin_ids, false)] {
        if ids.is_empty() {
            continue;
        }
        deleted += conn
            .prepare_cached(
                "DELETE FROM addresses
                 WHERE is_funding = ?2 AND tx_vin_vout_row_id IN (SELECT value FROM json_each(?1))",
            )?
            .execute(params![ids_json(ids)?, funding])?;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::tests::conn;

    fn funding(vout_id: i64, value: i64) -> AddressRow {
        AddressRow {
            address: "Addr1".into(),
            tx_hash: format!("fund{vout_id}"),
            valid_mainchain: true,
            matching_tx_hash: String::new(),
            value,
            block_time: 100,
            is_funding: true,
            tx_vin_vout_index: 0,
            tx_vin_vout_row_id: vout_id,
            tx_type: 0,
        }
    }

    #[test]
    fn balance_tracks_spends() {
        let conn = conn();
        insert_address_row(&conn, &funding(1, 300), InsertMode::Skip).expect("one");
        insert_address_row(&conn, &funding(2, 700), InsertMode::Skip).expect("two");
        let touched = set_matching_tx_for_vout(&conn, 1, "spender").expect("spend");
        assert_eq!(touched, vec!["Addr1".to_string()]);

        let bal = balance(&conn, "Addr1").expect("balance");
        assert_eq!((bal.num_spent, bal.total_spent), (1, 300));
        assert_eq!((bal.num_unspent, bal.total_unspent), (1, 700));
        assert_eq!(bal.total_received(), 1_000);

        clear_matching_for_spenders(&conn, &["spender".to_string()]).expect("clear");
        assert_eq!(balance(&conn, "Addr1").expect("balance").num_unspent, 2);

        set_valid_mainchain(&conn, &[2], &[], false).expect("invalidate");
        assert_eq!(balance(&conn, "Addr1").expect("balance").total_unspent, 300);
    }

    #[test]
    fn upsert_keeps_existing_match_when_new_is_empty() {
        let conn = conn();
        let id = insert_address_row(&conn, &funding(1, 300), InsertMode::Skip).expect("insert");
        set_matching_tx_for_vout(&conn, 1, "spender").expect("spend");
        let again = insert_address_row(&conn, &funding(1, 300), InsertMode::Upsert).expect("upsert");
        assert_eq!(id, again);
        let rows = rows_for_address(&conn, "Addr1").expect("rows");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].matching_tx_hash, "spender");
        assert_eq!(delete_by_row_ids(&conn, &[1], &[]).expect("delete"), 1);
    }

    #[test]
    fn unknown_address_has_zero_balance() {
        let conn = conn();
        let bal = balance(&conn, "nobody").expect("balance");
        assert_eq!(bal.total_received(), 0);
    }
}
