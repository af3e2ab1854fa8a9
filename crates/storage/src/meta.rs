//! The single-row `meta` table: network identity, schema versions and best block.

use rusqlite::{params, Connection, OptionalExtension};

use crate::{MetaRow, StoreError};

pub fn init_meta(conn: &Connection, meta: &MetaRow) -> Result<bool, StoreError> {
    let inserted = conn.execute(
        "INSERT INTO meta (id, net_name, currency_net, best_block_height, best_block_hash,
             compatibility_version, schema_version, maintenance_version, ibd_complete)
         VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT (id) DO NOTHING",
        params![
            meta.net_name,
            meta.currency_net,
            meta.best_block_height,
            meta.best_block_hash,
            meta.compatibility_version,
            meta.schema_version,
            meta.maintenance_version,
            meta.ibd_complete,
        ],
    )?;
    Ok(inserted == 1)
}

pub fn load_meta(conn: &Connection) -> Result<Option<MetaRow>, StoreError> {
    Ok(conn
        .query_row(
            "SELECT net_name, currency_net, best_block_height, best_block_hash,
                    compatibility_version, schema_version, maintenance_version, ibd_complete
             FROM meta WHERE id = 1",
            [],
            |row| {
                Ok(MetaRow {
                    net_name: row.get(0)?,
                    currency_net: row.get(1)?,
                    best_block_height: row.get(2)?,
                    best_block_hash: row.get(3)?,
                    compatibility_version: row.get(4)?,
                    schema_version: row.get(5)?,
                    maintenance_version: row.get(6)?,
                    ibd_complete: row.get(7)?,
                })
            },
        )
        .optional()?)
}

pub fn set_best_block(conn: &Connection, height: i64, hash: &str) -> Result<(), StoreError> {
    let updated = conn.execute(
        "UPDATE meta SET best_block_height = ?1, best_block_hash = ?2 WHERE id = 1",
        params![height, hash],
    )?;
    if updated != 1 {
        return Err(StoreError::Corruption("meta row missing".to_string()));
    }
    Ok(())
}

pub fn set_ibd_complete(conn: &Connection, complete: bool) -> Result<(), StoreError> {
    conn.execute("UPDATE meta SET ibd_complete = ?1 WHERE id = 1", [complete])?;
    Ok(())
}

pub fn set_versions(
    conn: &Connection,
    compatibility: u32,
    schema: u32,
    maintenance: u32,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE meta SET compatibility_version = ?1, schema_version = ?2, maintenance_version = ?3
         WHERE id = 1",
        params![compatibility, schema, maintenance],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::create_tables;

    fn meta() -> MetaRow {
        MetaRow {
            net_name: "regnet".into(),
            currency_net: 7,
            best_block_height: -1,
            best_block_hash: String::new(),
            compatibility_version: 1,
            schema_version: 3,
            maintenance_version: 0,
            ibd_complete: false,
        }
    }

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        create_tables(&conn).expect("tables");
        assert!(load_meta(&conn).expect("load").is_none());
        assert!(init_meta(&conn, &meta()).expect("init"));
        assert!(!init_meta(&conn, &meta()).expect("again"));

        set_best_block(&conn, 12, "abc").expect("best");
        set_ibd_complete(&conn, true).expect("ibd");
        let loaded = load_meta(&conn).expect("load").expect("row");
        assert_eq!(loaded.best_block_height, 12);
        assert_eq!(loaded.best_block_hash, "abc");
        assert!(loaded.ibd_complete);
    }

    #[test]
    fn best_block_requires_row() {
        let conn = Connection::open_in_memory().expect("open");
        create_tables(&conn).expect("tables");
        assert!(matches!(
            set_best_block(&conn, 1, "x"),
            Err(StoreError::Corruption(_))
        ));
    }
}
