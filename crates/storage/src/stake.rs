//! Tickets, votes, misses, agendas and the per-vote choice tables.

use rusqlite::{params, Connection, OptionalExtension};

use crate::{
    ids_json, insert_returning_id, AgendaVoteRow, InsertMode, InsertSql, MissRow, PoolStatus,
    SpendType, StoreError, TSpendVoteRow, TicketRow, TicketStatus, VoteRow,
};

const INSERT_TICKET: InsertSql = InsertSql {
    plain: "INSERT INTO tickets (tx_hash, block_hash, block_height, purchase_tx_db_id,
            stakesubmission_address, is_multisig, is_split, num_inputs, price, fee, spend_type,
            pool_status, is_mainchain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        RETURNING id",
    skip: "INSERT INTO tickets (tx_hash, block_hash, block_height, purchase_tx_db_id,
            stakesubmission_address, is_multisig, is_split, num_inputs, price, fee, spend_type,
            pool_status, is_mainchain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT (tx_hash, block_hash) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO tickets (tx_hash, block_hash, block_height, purchase_tx_db_id,
            stakesubmission_address, is_multisig, is_split, num_inputs, price, fee, spend_type,
            pool_status, is_mainchain)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT (tx_hash, block_hash) DO UPDATE SET
            is_mainchain = excluded.is_mainchain,
            spend_type = excluded.spend_type,
            pool_status = excluded.pool_status
        RETURNING id",
    select_id: "SELECT id FROM tickets WHERE tx_hash = ?1 AND block_hash = ?2",
};

const INSERT_VOTE: InsertSql = InsertSql {
    plain: "INSERT INTO votes (height, tx_hash, block_hash, candidate_block_hash, version,
            vote_bits, block_valid, ticket_hash, ticket_tx_db_id, ticket_price, vote_reward,
            is_mainchain, block_time)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        RETURNING id",
    skip: "INSERT INTO votes (height, tx_hash, block_hash, candidate_block_hash, version,
            vote_bits, block_valid, ticket_hash, ticket_tx_db_id, ticket_price, vote_reward,
            is_mainchain, block_time)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT (tx_hash, block_hash) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO votes (height, tx_hash, block_hash, candidate_block_hash, version,
            vote_bits, block_valid, ticket_hash, ticket_tx_db_id, ticket_price, vote_reward,
            is_mainchain, block_time)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        ON CONFLICT (tx_hash, block_hash) DO UPDATE SET
            is_mainchain = excluded.is_mainchain
        RETURNING id",
    select_id: "SELECT id FROM votes WHERE tx_hash = ?1 AND block_hash = ?2",
};

const INSERT_MISS: InsertSql = InsertSql {
    plain: "INSERT INTO misses (height, block_hash, candidate_block_hash, ticket_hash)
        VALUES (?1, ?2, ?3, ?4)
        RETURNING id",
    skip: "INSERT INTO misses (height, block_hash, candidate_block_hash, ticket_hash)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (ticket_hash, block_hash) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO misses (height, block_hash, candidate_block_hash, ticket_hash)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (ticket_hash, block_hash) DO UPDATE SET
            candidate_block_hash = excluded.candidate_block_hash
        RETURNING id",
    select_id: "SELECT id FROM misses WHERE ticket_hash = ?1 AND block_hash = ?2",
};

const INSERT_AGENDA_VOTE: InsertSql = InsertSql {
    plain: "INSERT INTO agenda_votes (votes_row_id, agendas_row_id, agenda_vote_choice)
        VALUES (?1, ?2, ?3)
        RETURNING id",
    skip: "INSERT INTO agenda_votes (votes_row_id, agendas_row_id, agenda_vote_choice)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (votes_row_id, agendas_row_id) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO agenda_votes (votes_row_id, agendas_row_id, agenda_vote_choice)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (votes_row_id, agendas_row_id) DO UPDATE SET
            agenda_vote_choice = excluded.agenda_vote_choice
        RETURNING id",
    select_id: "SELECT id FROM agenda_votes WHERE votes_row_id = ?1 AND agendas_row_id = ?2",
};

const INSERT_TSPEND_VOTE: InsertSql = InsertSql {
    plain: "INSERT INTO tspend_votes (votes_row_id, tspend_hash, tspend_vote_choice)
        VALUES (?1, ?2, ?3)
        RETURNING id",
    skip: "INSERT INTO tspend_votes (votes_row_id, tspend_hash, tspend_vote_choice)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (votes_row_id, tspend_hash) DO NOTHING
        RETURNING id",
    upsert: "INSERT INTO tspend_votes (votes_row_id, tspend_hash, tspend_vote_choice)
        VALUES (?1, ?2, ?3)
        ON CONFLICT (votes_row_id, tspend_hash) DO UPDATE SET
            tspend_vote_choice = excluded.tspend_vote_choice
        RETURNING id",
    select_id: "SELECT id FROM tspend_votes WHERE votes_row_id = ?1 AND tspend_hash = ?2",
};

pub fn insert_ticket(conn: &Connection, ticket: &TicketRow, mode: InsertMode) -> Result<i64, StoreError> {
    insert_returning_id(
        conn,
        &INSERT_TICKET,
        mode,
        params![
            ticket.tx_hash,
            ticket.block_hash,
            ticket.block_height,
            ticket.purchase_tx_db_id,
            ticket.stakesubmission_address,
            ticket.is_multisig,
            ticket.is_split,
            ticket.num_inputs,
            ticket.price,
            ticket.fee,
            ticket.spend_type as i64,
            ticket.pool_status as i64,
            ticket.is_mainchain,
        ],
        params![ticket.tx_hash, ticket.block_hash],
    )
}

fn ticket_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<(TicketStatus, i64, i64)> {
    Ok((
        TicketStatus {
            id: row.get(0)?,
            tx_hash: row.get(1)?,
            block_height: row.get(2)?,
            spend_type: SpendType::Unspent,
            pool_status: PoolStatus::Live,
            spend_height: row.get(5)?,
            spend_tx_db_id: row.get(6)?,
            is_mainchain: row.get(7)?,
        },
        row.get(3)?,
        row.get(4)?,
    ))
}

fn decode_status((mut status, spend_type, pool_status): (TicketStatus, i64, i64)) -> Result<TicketStatus, StoreError> {
    status.spend_type = SpendType::from_i64(spend_type)
        .ok_or_else(|| StoreError::Corruption(format!("ticket spend_type {spend_type}")))?;
    status.pool_status = PoolStatus::from_i64(pool_status)
        .ok_or_else(|| StoreError::Corruption(format!("ticket pool_status {pool_status}")))?;
    Ok(status)
}

const TICKET_STATUS_COLUMNS: &str =
    "id, tx_hash, block_height, spend_type, pool_status, spend_height, spend_tx_db_id, is_mainchain";

/// The main-chain row for a ticket, or its most recent row when no copy is main chain.
pub fn ticket_by_hash(conn: &Connection, tx_hash: &str) -> Result<Option<TicketStatus>, StoreError> {
    let sql = format!(
        "SELECT {TICKET_STATUS_COLUMNS} FROM tickets WHERE tx_hash = ?1
         ORDER BY is_mainchain DESC, id DESC LIMIT 1"
    );
    conn.prepare_cached(&sql)?
        .query_row([tx_hash], ticket_status)
        .optional()?
        .map(decode_status)
        .transpose()
}

/// Records the vote or revocation that spent a ticket.
pub fn set_ticket_spending(
    conn: &Connection,
    ticket_id: i64,
    spend_type: SpendType,
    pool_status: PoolStatus,
    spend_height: i64,
    spend_tx_db_id: i64,
) -> Result<(), StoreError> {
    conn.prepare_cached(
        "UPDATE tickets SET spend_type = ?2, pool_status = ?3, spend_height = ?4, spend_tx_db_id = ?5
         WHERE id = ?1",
    )?
    .execute(params![
        ticket_id,
        spend_type as i64,
        pool_status as i64,
        spend_height,
        spend_tx_db_id
    ])?;
    Ok(())
}

pub fn set_pool_status_by_hashes(
    conn: &Connection,
    hashes: &[String],
    status: PoolStatus,
) -> Result<usize, StoreError> {
    if hashes.is_empty() {
        return Ok(0);
    }
    Ok(conn
        .prepare_cached(
            "UPDATE tickets SET pool_status = ?2
             WHERE is_mainchain = 1 AND spend_type = 0
               AND tx_hash IN (SELECT value FROM json_each(?1))",
        )?
        .execute(params![serde_json::to_string(hashes)?, status as i64])?)
}

/// Marks live unspent main-chain tickets bought at or below `max_purchase_height` expired.
pub fn expire_live_tickets(conn: &Connection, max_purchase_height: i64) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "UPDATE tickets SET pool_status = 2
         WHERE pool_status = 0 AND spend_type = 0 AND is_mainchain = 1 AND block_height <= ?1
         RETURNING tx_hash",
    )?;
    let rows = stmt.query_map([max_purchase_height], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Unspent main-chain tickets as (hash, row id, purchase height).
pub fn unspent_tickets(conn: &Connection) -> Result<Vec<(String, i64, i64)>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT tx_hash, id, block_height FROM tickets
         WHERE spend_type = 0 AND is_mainchain = 1 ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn set_tickets_mainchain_by_block(
    conn: &Connection,
    block_hash: &str,
    mainchain: bool,
) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "UPDATE tickets SET is_mainchain = ?2 WHERE block_hash = ?1 RETURNING tx_hash",
    )?;
    let rows = stmt.query_map(params![block_hash, mainchain], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Marks tickets spent by any of the given transaction rows unspent. Voted
/// tickets go back to live; revoked ones keep the missed or expired status
/// they had before the revocation.
pub fn revert_ticket_spends(conn: &Connection, spender_tx_ids: &[i64]) -> Result<usize, StoreError> {
    if spender_tx_ids.is_empty() {
        return Ok(0);
    }
    Ok(conn
        .prepare_cached(
            "UPDATE tickets SET
                 pool_status = CASE WHEN spend_type = 2 THEN 0 ELSE pool_status END,
                 spend_type = 0, spend_height = NULL, spend_tx_db_id = NULL
             WHERE spend_tx_db_id IN (SELECT value FROM json_each(?1))",
        )?
        .execute([ids_json(spender_tx_ids)?])?)
}

/// Undoes the pool transitions a block caused: tickets it recorded as missed
/// and tickets that expired at its height go back to live.
pub fn revive_tickets_for_block(
    conn: &Connection,
    block_hash: &str,
    height: i64,
    ticket_expiry: i64,
) -> Result<usize, StoreError> {
    let missed = conn
        .prepare_cached(
            "UPDATE tickets SET pool_status = 0
             WHERE spend_type = 0 AND pool_status = 3
               AND tx_hash IN (SELECT ticket_hash FROM misses WHERE block_hash = ?1)",
        )?
        .execute([block_hash])?;
    let expired = conn
        .prepare_cached(
            "UPDATE tickets SET pool_status = 0
             WHERE spend_type = 0 AND pool_status = 2 AND block_height + ?2 >= ?1",
        )?
        .execute(params![height, ticket_expiry])?;
    Ok(missed + expired)
}

pub fn insert_vote(conn: &Connection, vote: &VoteRow, mode: InsertMode) -> Result<i64, StoreError> {
    insert_returning_id(
        conn,
        &INSERT_VOTE,
        mode,
        params![
            vote.height,
            vote.tx_hash,
            vote.block_hash,
            vote.candidate_block_hash,
            vote.version,
            vote.vote_bits,
            vote.block_valid,
            vote.ticket_hash,
            vote.ticket_tx_db_id,
            vote.ticket_price,
            vote.vote_reward,
            vote.is_mainchain,
            vote.block_time,
        ],
        params![vote.tx_hash, vote.block_hash],
    )
}

pub fn set_votes_mainchain_by_block(conn: &Connection, block_hash: &str, mainchain: bool) -> Result<usize, StoreError> {
    Ok(conn
        .prepare_cached("UPDATE votes SET is_mainchain = ?2 WHERE block_hash = ?1")?
        .execute(params![block_hash, mainchain])?)
}

/// Main-chain votes cast on `candidate_block_hash` as (approve, total).
pub fn vote_tally(conn: &Connection, candidate_block_hash: &str) -> Result<(i64, i64), StoreError> {
    Ok(conn
        .prepare_cached(
            "SELECT COALESCE(SUM(block_valid), 0), COUNT(*) FROM votes
             WHERE candidate_block_hash = ?1 AND is_mainchain = 1",
        )?
        .query_row([candidate_block_hash], |row| Ok((row.get(0)?, row.get(1)?)))?)
}

pub fn insert_miss(conn: &Connection, miss: &MissRow, mode: InsertMode) -> Result<i64, StoreError> {
    insert_returning_id(
        conn,
        &INSERT_MISS,
        mode,
        params![miss.height, miss.block_hash, miss.candidate_block_hash, miss.ticket_hash],
        params![miss.ticket_hash, miss.block_hash],
    )
}

pub fn misses_in_block(conn: &Connection, block_hash: &str) -> Result<Vec<String>, StoreError> {
    let mut stmt =
        conn.prepare_cached("SELECT ticket_hash FROM misses WHERE block_hash = ?1 ORDER BY id")?;
    let rows = stmt.query_map([block_hash], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

/// Inserts or finds an agenda by name.
pub fn insert_agenda(conn: &Connection, name: &str, vote_version: u32, mask: u16) -> Result<i64, StoreError> {
    Ok(conn
        .prepare_cached(
            "INSERT INTO agendas (name, vote_version, mask) VALUES (?1, ?2, ?3)
             ON CONFLICT (name) DO UPDATE SET vote_version = excluded.vote_version,
                 mask = excluded.mask
             RETURNING id",
        )?
        .query_row(params![name, vote_version, mask], |row| row.get(0))?)
}

pub fn agenda_id(conn: &Connection, name: &str) -> Result<Option<i64>, StoreError> {
    Ok(conn
        .prepare_cached("SELECT id FROM agendas WHERE name = ?1")?
        .query_row([name], |row| row.get(0))
        .optional()?)
}

pub fn insert_agenda_vote(conn: &Connection, row: &AgendaVoteRow, mode: InsertMode) -> Result<i64, StoreError> {
    insert_returning_id(
        conn,
        &INSERT_AGENDA_VOTE,
        mode,
        params![row.votes_row_id, row.agendas_row_id, row.choice],
        params![row.votes_row_id, row.agendas_row_id],
    )
}

/// Counts of each choice cast for an agenda by main-chain votes, keyed by choice code.
pub fn agenda_choice_counts(conn: &Connection, agenda: &str) -> Result<Vec<(i16, i64)>, StoreError> {
    let mut stmt = conn.prepare_cached(
        "SELECT av.agenda_vote_choice, COUNT(*) FROM agenda_votes av
         JOIN agendas a ON a.id = av.agendas_row_id
         JOIN votes v ON v.id = av.votes_row_id
         WHERE a.name = ?1 AND v.is_mainchain = 1
         GROUP BY av.agenda_vote_choice ORDER BY av.agenda_vote_choice",
    )?;
    let rows = stmt.query_map([agenda], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn insert_tspend_vote(conn: &Connection, row: &TSpendVoteRow, mode: InsertMode) -> Result<i64, StoreError> {
    insert_returning_id(
        conn,
        &INSERT_TSPEND_VOTE,
        mode,
        params![row.votes_row_id, row.tspend_hash, row.choice],
        params![row.votes_row_id, row.tspend_hash],
    )
}

/// Main-chain (yes, no) vote counts for a treasury spend.
pub fn tspend_tally(conn: &Connection, tspend_hash: &str) -> Result<(i64, i64), StoreError> {
    Ok(conn
        .prepare_cached(
            "SELECT COALESCE(SUM(tv.tspend_vote_choice = 1), 0),
                    COALESCE(SUM(tv.tspend_vote_choice = 2), 0)
             FROM tspend_votes tv JOIN votes v ON v.id = tv.votes_row_id
             WHERE tv.tspend_hash = ?1 AND v.is_mainchain = 1",
        )?
        .query_row([tspend_hash], |row| Ok((row.get(0)?, row.get(1)?)))?)
}

/// Deletes stake rows recorded for the block.
pub fn delete_by_block(conn: &Connection, block_hash: &str) -> Result<usize, StoreError> {
    let mut deleted = 0;
    deleted += conn
        .prepare_cached(
            "DELETE FROM agenda_votes WHERE votes_row_id IN (SELECT id FROM votes WHERE block_hash = ?1)",
        )?
        .execute([block_hash])?;
    deleted += conn
        .prepare_cached(
            "DELETE FROM tspend_votes WHERE votes_row_id IN (SELECT id FROM votes WHERE block_hash = ?1)",
        )?
        .execute([block_hash])?;
    for sql in [
        "DELETE FROM votes WHERE block_hash = ?1",
        "DELETE FROM misses WHERE block_hash = ?1",
        "DELETE FROM tickets WHERE block_hash = ?1",
    ] {
        deleted += conn.prepare_cached(sql)?.execute([block_hash])?;
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::tests::conn;

    fn ticket(hash: &str, block: &str, height: i64) -> TicketRow {
        TicketRow {
            tx_hash: hash.into(),
            block_hash: block.into(),
            block_height: height,
            purchase_tx_db_id: 1,
            stakesubmission_address: "Ss1".into(),
            is_multisig: false,
            is_split: false,
            num_inputs: 1,
            price: 0.5,
            fee: 0.001,
            spend_type: SpendType::Unspent,
            pool_status: PoolStatus::Live,
            is_mainchain: true,
        }
    }

    fn vote(hash: &str, ticket: &str) -> VoteRow {
        VoteRow {
            height: 10,
            tx_hash: hash.into(),
            block_hash: "b10".into(),
            candidate_block_hash: "b9".into(),
            version: 10,
            vote_bits: 0x0003,
            block_valid: true,
            ticket_hash: ticket.into(),
            ticket_tx_db_id: 1,
            ticket_price: 0.5,
            vote_reward: 0.01,
            is_mainchain: true,
            block_time: 1_000,
        }
    }

    #[test]
    fn ticket_spend_and_revert() {
        let conn = conn();
        let id = insert_ticket(&conn, &ticket("tk1", "b2", 2), InsertMode::Skip).expect("ticket");
        set_ticket_spending(&conn, id, SpendType::Voted, PoolStatus::Voted, 10, 77).expect("spend");
        let status = ticket_by_hash(&conn, "tk1").expect("lookup").expect("row");
        assert_eq!(status.spend_type, SpendType::Voted);
        assert_eq!(status.spend_tx_db_id, Some(77));
        assert!(unspent_tickets(&conn).expect("unspent").is_empty());

        assert_eq!(revert_ticket_spends(&conn, &[77]).expect("revert"), 1);
        let status = ticket_by_hash(&conn, "tk1").expect("lookup").expect("row");
        assert_eq!((status.spend_type, status.pool_status), (SpendType::Unspent, PoolStatus::Live));
        assert_eq!(status.spend_height, None);
    }

    #[test]
    fn reverting_a_revocation_keeps_the_pool_status() {
        let conn = conn();
        let missed = insert_ticket(&conn, &ticket("tk1", "b1", 1), InsertMode::Skip).expect("missed");
        let expired = insert_ticket(&conn, &ticket("tk2", "b1", 1), InsertMode::Skip).expect("expired");
        set_ticket_spending(&conn, missed, SpendType::Revoked, PoolStatus::Missed, 12, 90).expect("revoke");
        set_ticket_spending(&conn, expired, SpendType::Revoked, PoolStatus::Expired, 12, 91).expect("revoke");

        assert_eq!(revert_ticket_spends(&conn, &[90, 91]).expect("revert"), 2);
        let missed = ticket_by_hash(&conn, "tk1").expect("lookup").expect("row");
        assert_eq!((missed.spend_type, missed.pool_status), (SpendType::Unspent, PoolStatus::Missed));
        assert_eq!(missed.spend_tx_db_id, None);
        let expired = ticket_by_hash(&conn, "tk2").expect("lookup").expect("row");
        assert_eq!((expired.spend_type, expired.pool_status), (SpendType::Unspent, PoolStatus::Expired));
    }

    #[test]
    fn expiry_only_touches_old_live_tickets() {
        let conn = conn();
        insert_ticket(&conn, &ticket("old", "b1", 1), InsertMode::Skip).expect("old");
        insert_ticket(&conn, &ticket("new", "b5", 5), InsertMode::Skip).expect("new");
        assert_eq!(expire_live_tickets(&conn, 3).expect("expire"), vec!["old".to_string()]);
        assert_eq!(
            ticket_by_hash(&conn, "old").expect("lookup").expect("row").pool_status,
            PoolStatus::Expired
        );
        assert_eq!(unspent_tickets(&conn).expect("unspent").len(), 2);
    }

    #[test]
    fn vote_choices_and_tallies() {
        let conn = conn();
        let vote_id = insert_vote(&conn, &vote("v1", "tk1"), InsertMode::Skip).expect("vote");
        assert_eq!(insert_vote(&conn, &vote("v1", "tk1"), InsertMode::Skip).expect("dup"), vote_id);
        let agenda = insert_agenda(&conn, "blake3pow", 10, 0x0018).expect("agenda");
        assert_eq!(insert_agenda(&conn, "blake3pow", 10, 0x0018).expect("again"), agenda);
        insert_agenda_vote(
            &conn,
            &AgendaVoteRow { votes_row_id: vote_id, agendas_row_id: agenda, choice: 0 },
            InsertMode::Skip,
        )
        .expect("agenda vote");
        insert_tspend_vote(
            &conn,
            &TSpendVoteRow { votes_row_id: vote_id, tspend_hash: "ts1".into(), choice: 1 },
            InsertMode::Skip,
        )
        .expect("tspend vote");

        assert_eq!(agenda_choice_counts(&conn, "blake3pow").expect("counts"), vec![(0, 1)]);
        assert_eq!(tspend_tally(&conn, "ts1").expect("tally"), (1, 0));
        assert_eq!(vote_tally(&conn, "b9").expect("tally"), (1, 1));

        set_votes_mainchain_by_block(&conn, "b10", false).expect("flip");
        assert_eq!(tspend_tally(&conn, "ts1").expect("tally"), (0, 0));
        assert!(delete_by_block(&conn, "b10").expect("delete") >= 3);
    }

    #[test]
    fn misses_revive_on_rollback() {
        let conn = conn();
        insert_ticket(&conn, &ticket("tk1", "b1", 1), InsertMode::Skip).expect("ticket");
        set_pool_status_by_hashes(&conn, &["tk1".to_string()], PoolStatus::Missed).expect("miss");
        insert_miss(
            &conn,
            &MissRow {
                height: 6,
                block_hash: "b6".into(),
                candidate_block_hash: "b5".into(),
                ticket_hash: "tk1".into(),
            },
            InsertMode::Skip,
        )
        .expect("miss row");
        assert_eq!(misses_in_block(&conn, "b6").expect("misses"), vec!["tk1".to_string()]);
        assert_eq!(revive_tickets_for_block(&conn, "b6", 6, 8).expect("revive"), 1);
        assert_eq!(
            ticket_by_hash(&conn, "tk1").expect("lookup").expect("row").pool_status,
            PoolStatus::Live
        );
    }
}
