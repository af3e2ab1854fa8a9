use chaindex_storage::{
    blocks, count_rows, meta, schema, InsertMode, MetaRow, Store, StoreError, StoreOptions, Table,
};

fn meta_row() -> MetaRow {
    MetaRow {
        net_name: "testnet3".into(),
        currency_net: 0xb194aa75,
        best_block_height: -1,
        best_block_hash: String::new(),
        compatibility_version: 1,
        schema_version: 3,
        maintenance_version: 0,
        ibd_complete: false,
    }
}

#[test]
fn schema_and_rows_survive_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("index.sqlite");

    {
        let store = Store::open(&path, StoreOptions::default()).expect("open");
        store
            .write(|tx| -> Result<(), StoreError> {
                schema::create_tables(tx)?;
                schema::create_indexes(tx)?;
                meta::init_meta(tx, &meta_row())?;
                meta::set_best_block(tx, 0, "genesis")?;
                Ok(())
            })
            .expect("init");
    }

    let store = Store::open(&path, StoreOptions::default()).expect("reopen");
    let (loaded, indexes_ok, blocks) = store
        .read(|conn| -> Result<_, StoreError> {
            Ok((
                meta::load_meta(conn)?,
                schema::unique_indexes_present(conn)?,
                count_rows(conn, Table::Blocks)?,
            ))
        })
        .expect("read");
    let loaded = loaded.expect("meta row");
    assert_eq!(loaded.best_block_hash, "genesis");
    assert_eq!(loaded.net_name, "testnet3");
    assert!(indexes_ok);
    assert_eq!(blocks, 0);
}

#[test]
fn failed_write_leaves_no_rows() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Store::open(&dir.path().join("index.sqlite"), StoreOptions::default()).expect("open");
    store
        .write(|tx| -> Result<(), StoreError> {
            schema::create_tables(tx)?;
            schema::create_indexes(tx)?;
            Ok(())
        })
        .expect("schema");

    let result = store.write(|tx| -> Result<(), StoreError> {
        tx.execute(
            "INSERT INTO block_chain (block_db_id, prev_hash, this_hash) VALUES (1, 'a', 'b')",
            [],
        )?;
        blocks::set_block_valid(tx, "missing", false)
    });
    assert!(matches!(result, Err(StoreError::NotFound)));

    let rows = store
        .read(|conn| count_rows(conn, Table::BlockChain))
        .expect("count");
    assert_eq!(rows, 0);
    assert_eq!(InsertMode::from_flags(true, false), InsertMode::Skip);
}
