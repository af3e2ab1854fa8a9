//! `blocks` and `block_chain` rows.

use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    ids_json, insert_returning_id, strings_json, BlockRow, BlockStatus, InsertMode, InsertSql,
    StoreError,
};

const INSERT_BLOCK: InsertSql = InsertSql {
    plain: "INSERT INTO blocks (hash, height, size, is_valid, is_mainchain, version, numtx,
            num_rtx, num_stx, txdbids, stxdbids, time, nonce, vote_bits, voters, fresh_stake,
            revocations, pool_size, bits, sbits, difficulty, stake_version, previous_hash,
            chainwork, winners)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
            ?19, ?20, ?21, ?22, ?23, ?24, ?25)
        RETURNING id",
    skip: "INSERT INTO blocks (hash, height, size, is_valid, is_mainchain, version, numtx,
            num_rtx, num_stx, txdbids, stxdbids, time, nonce, vote_bits, voters, fresh_stake,
            revocations, pool_size, bits, sbits, difficulty, stake_version, previous_hash,
            chainwork, winners)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
            ?19, ?20, ?21, ?22, ?23, ?24, ?25)
        ON CONFLICT (hash) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO blocks (hash, height, size, is_valid, is_mainchain, version, numtx,
            num_rtx, num_stx, txdbids, stxdbids, time, nonce, vote_bits, voters, fresh_stake,
            revocations, pool_size, bits, sbits, difficulty, stake_version, previous_hash,
            chainwork, winners)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18,
            ?19, ?20, ?21, ?22, ?23, ?24, ?25)
        ON CONFLICT (hash) DO UPDATE SET
            is_valid = excluded.is_valid,
            is_mainchain = excluded.is_mainchain,
            txdbids = excluded.txdbids,
            stxdbids = excluded.stxdbids,
            winners = excluded.winners,
            chainwork = excluded.chainwork
        RETURNING id",
    select_id: "SELECT id FROM blocks WHERE hash = ?1",
};

pub fn insert_block(conn: &Connection, block: &BlockRow, mode: InsertMode) -> Result<i64, StoreError> {
    let tx_ids = ids_json(&block.tx_db_ids)?;
    let stx_ids = ids_json(&block.stx_db_ids)?;
    let winners = strings_json(&block.winners)?;
    let numtx = block.num_rtx + block.num_stx;
    insert_returning_id(
        conn,
        &INSERT_BLOCK,
        mode,
        params![
            block.hash,
            block.height,
            block.size,
            block.is_valid,
            block.is_mainchain,
            block.version,
            numtx,
            block.num_rtx,
            block.num_stx,
            tx_ids,
            stx_ids,
            block.time,
            block.nonce,
            block.vote_bits,
            block.voters,
            block.fresh_stake,
            block.revocations,
            block.pool_size,
            block.bits,
            block.sbits,
            block.difficulty,
            block.stake_version,
            block.previous_hash,
            block.chainwork,
            winners,
        ],
        params![block.hash],
    )
}

/// Records the block in the linked list. An existing entry for the hash is left alone.
pub fn insert_block_chain(
    conn: &Connection,
    block_db_id: i64,
    prev_hash: &str,
    this_hash: &str,
) -> Result<(), StoreError> {
    conn.prepare_cached(
        "INSERT INTO block_chain (block_db_id, prev_hash, this_hash, next_hash)
         VALUES (?1, ?2, ?3, '')
         ON CONFLICT DO NOTHING",
    )?
    .execute(params![block_db_id, prev_hash, this_hash])?;
    Ok(())
}

pub fn set_next_hash(conn: &Connection, this_hash: &str, next_hash: &str) -> Result<bool, StoreError> {
    let updated = conn
        .prepare_cached("UPDATE block_chain SET next_hash = ?2 WHERE this_hash = ?1")?
        .execute(params![this_hash, next_hash])?;
    Ok(updated == 1)
}

pub fn next_hash(conn: &Connection, this_hash: &str) -> Result<Option<String>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT next_hash FROM block_chain WHERE this_hash = ?1",
            [this_hash],
            |row| row.get(0),
        )
        .optional()?)
}

/// Flags the block main chain (or side chain) and returns its parent's hash.
pub fn set_block_mainchain(conn: &Connection, hash: &str, mainchain: bool) -> Result<String, StoreError> {
    Ok(conn
        .prepare_cached("UPDATE blocks SET is_mainchain = ?2 WHERE hash = ?1 RETURNING previous_hash")?
        .query_row(params![hash, mainchain], |row| row.get(0))?)
}

pub fn set_block_valid(conn: &Connection, hash: &str, valid: bool) -> Result<(), StoreError> {
    let updated = conn
        .prepare_cached("UPDATE blocks SET is_valid = ?2 WHERE hash = ?1")?
        .execute(params![hash, valid])?;
    if updated == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

const STATUS_COLUMNS: &str = "id, hash, height, is_valid, is_mainchain, previous_hash";

fn status_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlockStatus> {
    Ok(BlockStatus {
        id: row.get(0)?,
        hash: row.get(1)?,
        height: row.get(2)?,
        is_valid: row.get(3)?,
        is_mainchain: row.get(4)?,
        previous_hash: row.get(5)?,
    })
}

pub fn block_status(conn: &Connection, hash: &str) -> Result<Option<BlockStatus>, StoreError> {
    let sql = format!("SELECT {STATUS_COLUMNS} FROM blocks WHERE hash = ?1");
    Ok(conn
        .prepare_cached(&sql)?
        .query_row([hash], status_from_row)
        .optional()?)
}

/// Highest main-chain block, if any.
pub fn mainchain_tip(conn: &Connection) -> Result<Option<BlockStatus>, StoreError> {
    let sql = format!(
        "SELECT {STATUS_COLUMNS} FROM blocks WHERE is_mainchain = 1 ORDER BY height DESC LIMIT 1"
    );
    Ok(conn.prepare_cached(&sql)?.query_row([], status_from_row).optional()?)
}

pub fn mainchain_hash_at(conn: &Connection, height: i64) -> Result<Option<String>, StoreError> {
    Ok(conn
        .prepare_cached("SELECT hash FROM blocks WHERE height = ?1 AND is_mainchain = 1")?
        .query_row([height], |row| row.get(0))
        .optional()?)
}

pub fn block_exists(conn: &Connection, hash: &str) -> Result<bool, StoreError> {
    Ok(block_status(conn, hash)?.is_some())
}

/// Side-chain blocks, highest first.
pub fn side_chain_blocks(conn: &Connection) -> Result<Vec<BlockStatus>, StoreError> {
    let sql = format!(
        "SELECT {STATUS_COLUMNS} FROM blocks WHERE is_mainchain = 0 ORDER BY height DESC, id DESC"
    );
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt.query_map([], status_from_row)?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn load_block(conn: &Connection, hash: &str) -> Result<Option<BlockRow>, StoreError> {
    let row = conn
        .query_row(
            "SELECT hash, height, size, is_valid, is_mainchain, version, num_rtx, num_stx,
                    txdbids, stxdbids, time, nonce, vote_bits, voters, fresh_stake, revocations,
                    pool_size, bits, sbits, difficulty, stake_version, previous_hash, chainwork,
                    winners
             FROM blocks WHERE hash = ?1",
            [hash],
            |row| {
                Ok((
                    BlockRow {
                        hash: row.get(0)?,
                        height: row.get(1)?,
                        size: row.get(2)?,
                        is_valid: row.get(3)?,
                        is_mainchain: row.get(4)?,
                        version: row.get(5)?,
                        num_rtx: row.get(6)?,
                        num_stx: row.get(7)?,
                        tx_db_ids: Vec::new(),
                        stx_db_ids: Vec::new(),
                        time: row.get(10)?,
                        nonce: row.get(11)?,
                        vote_bits: row.get(12)?,
                        voters: row.get(13)?,
                        fresh_stake: row.get(14)?,
                        revocations: row.get(15)?,
                        pool_size: row.get(16)?,
                        bits: row.get(17)?,
                        sbits: row.get(18)?,
                        difficulty: row.get(19)?,
                        stake_version: row.get(20)?,
                        previous_hash: row.get(21)?,
                        chainwork: row.get(22)?,
                        winners: Vec::new(),
                    },
                    row.get::<_, String>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(23)?,
                ))
            },
        )
        .optional()?;
    let Some((mut block, tx_ids, stx_ids, winners)) = row else {
        return Ok(None);
    };
    block.tx_db_ids = crate::ids_from_json(&tx_ids)?.into_vec();
    block.stx_db_ids = crate::ids_from_json(&stx_ids)?.into_vec();
    block.winners = crate::strings_from_json(&winners)?;
    Ok(Some(block))
}

/// Removes the block and its linked-list entry. Returns whether a block row existed.
pub fn delete_block(conn: &Connection, hash: &str) -> Result<bool, StoreError> {
    conn.prepare_cached("DELETE FROM block_chain WHERE this_hash = ?1")?
        .execute([hash])?;
    conn.prepare_cached("UPDATE block_chain SET next_hash = '' WHERE next_hash = ?1")?
        .execute([hash])?;
    let deleted = conn
        .prepare_cached("DELETE FROM blocks WHERE hash = ?1")?
        .execute([hash])?;
    Ok(deleted > 0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::schema::{create_indexes, create_tables};

    pub(crate) fn conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        create_tables(&conn).expect("tables");
        create_indexes(&conn).expect("indexes");
        conn
    }

    pub(crate) fn block(hash: &str, height: i64, prev: &str) -> BlockRow {
        BlockRow {
            hash: hash.to_string(),
            height,
            size: 300,
            is_valid: true,
            is_mainchain: true,
            version: 10,
            num_rtx: 1,
            num_stx: 0,
            tx_db_ids: vec![1],
            stx_db_ids: Vec::new(),
            time: 1_600_000_000 + height,
            nonce: 7,
            vote_bits: 1,
            voters: 0,
            fresh_stake: 0,
            revocations: 0,
            pool_size: 0,
            bits: 0x207f_ffff,
            sbits: 20_000,
            difficulty: 1.0,
            stake_version: 0,
            previous_hash: prev.to_string(),
            chainwork: "02".into(),
            winners: vec!["aa".into()],
        }
    }

    #[test]
    fn skip_returns_existing_id() {
        let conn = conn();
        let first = insert_block(&conn, &block("b1", 1, "b0"), InsertMode::Skip).expect("insert");
        let mut changed = block("b1", 1, "b0");
        changed.is_mainchain = false;
        let second = insert_block(&conn, &changed, InsertMode::Skip).expect("skip");
        assert_eq!(first, second);
        assert!(block_status(&conn, "b1").expect("status").expect("row").is_mainchain);

        let third = insert_block(&conn, &changed, InsertMode::Upsert).expect("upsert");
        assert_eq!(first, third);
        assert!(!block_status(&conn, "b1").expect("status").expect("row").is_mainchain);
    }

    #[test]
    fn tip_and_linked_list() {
        let conn = conn();
        let id1 = insert_block(&conn, &block("b1", 1, "b0"), InsertMode::Skip).expect("b1");
        let id2 = insert_block(&conn, &block("b2", 2, "b1"), InsertMode::Skip).expect("b2");
        insert_block_chain(&conn, id1, "b0", "b1").expect("chain");
        insert_block_chain(&conn, id2, "b1", "b2").expect("chain");
        insert_block_chain(&conn, id2, "b1", "b2").expect("chain again");
        assert!(set_next_hash(&conn, "b1", "b2").expect("next"));

        let tip = mainchain_tip(&conn).expect("tip").expect("row");
        assert_eq!((tip.hash.as_str(), tip.height), ("b2", 2));
        assert_eq!(mainchain_hash_at(&conn, 1).expect("at").as_deref(), Some("b1"));

        assert_eq!(set_block_mainchain(&conn, "b2", false).expect("flip"), "b1");
        assert_eq!(mainchain_tip(&conn).expect("tip").expect("row").hash, "b1");
        assert_eq!(side_chain_blocks(&conn).expect("side").len(), 1);

        assert!(delete_block(&conn, "b2").expect("delete"));
        assert_eq!(next_hash(&conn, "b1").expect("next").as_deref(), Some(""));
    }

    #[test]
    fn load_restores_json_columns() {
        let conn = conn();
        insert_block(&conn, &block("b1", 1, "b0"), InsertMode::Plain).expect("insert");
        let loaded = load_block(&conn, "b1").expect("load").expect("row");
        assert_eq!(loaded, block("b1", 1, "b0"));
        assert!(load_block(&conn, "nope").expect("load").is_none());
        assert!(matches!(set_block_valid(&conn, "nope", false), Err(StoreError::NotFound)));
    }
}
