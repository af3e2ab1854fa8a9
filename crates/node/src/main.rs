pub mod config;
pub mod import;

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chaindex_chainstate::sync::{import_side_chains, sync};
use chaindex_chainstate::{adapter_for, ChainDb, ChainStateError};
use chaindex_log::{log_info, log_warn};
use chaindex_storage::{count_rows, meta, schema, Store, StoreError, StoreOptions, Table};

use crate::config::{usage, CliAction, Config};
use crate::import::FileSource;

pub async fn run_entry() -> Result<(), String> {
    match config::parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("chaindex {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(config).await,
    }
}

/// What one run did, for callers that drive the binary in-process.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    pub height: i64,
    pub stored: usize,
    pub rolled_back: usize,
    pub side_blocks: usize,
    pub purged: usize,
}

pub async fn run_with_config(config: Config) -> Result<(), String> {
    run_with_summary(config).await.map(|_| ())
}

pub async fn run_with_summary(config: Config) -> Result<RunSummary, String> {
    chaindex_log::init(&config.log);
    let start_time = Instant::now();
    log_info!(
        "Startup: network={}, db={}",
        config.network.name(),
        config.db_path.display()
    );

    fs::create_dir_all(&config.data_dir).map_err(|err| err.to_string())?;
    if let Some(parent) = config.db_path.parent() {
        fs::create_dir_all(parent).map_err(|err| err.to_string())?;
    }
    let store = Store::open(
        &config.db_path,
        StoreOptions {
            query_timeout: config.query_timeout(),
            ..StoreOptions::default()
        },
    )
    .map_err(|err| format!("open {}: {err}", config.db_path.display()))?;

    if config.drop_indexes || config.create_indexes {
        let create = config.create_indexes;
        blocking("index maintenance", move || maintain_indexes(&store, create)).await?;
        return Ok(RunSummary::default());
    }

    let adapter = adapter_for(config.network, true);
    let indexer = config.indexer();
    let db = Arc::new(blocking("open", move || ChainDb::open(store, adapter, indexer)).await?);
    let tip = db.best_block();
    log_info!(
        "Startup: tip {} at {} ({:.1}s)",
        tip.hash_str(),
        tip.height,
        start_time.elapsed().as_secs_f64()
    );

    let mut summary = RunSummary {
        height: tip.height,
        ..RunSummary::default()
    };

    if config.status {
        let db = Arc::clone(&db);
        blocking("status", move || print_status(&db)).await?;
        return Ok(summary);
    }

    if let Some(count) = config.purge {
        let db = Arc::clone(&db);
        let report = blocking("purge", move || db.purge_best_blocks(count)).await?;
        log_info!("purged {} blocks, tip now at {}", report.blocks, report.height);
        summary.purged = report.blocks;
        summary.height = report.height;
        return Ok(summary);
    }

    if let Some(path) = config.import.clone() {
        let source = FileSource::open(&path)?;
        log_info!("importing {} main chain blocks from {}", source.main_len(), path.display());

        let cancel = Arc::new(AtomicBool::new(false));
        let signal_task = spawn_signal_handler(Arc::clone(&cancel), db.store().cancel_flag());

        let worker_db = Arc::clone(&db);
        let worker_cancel = Arc::clone(&cancel);
        let joined = tokio::task::spawn_blocking(move || {
            let report = sync(&worker_db, &source, &worker_cancel)?;
            let side_blocks = import_side_chains(&worker_db, &source)?;
            Ok::<_, ChainStateError>((report, side_blocks))
        })
        .await;
        signal_task.abort();
        let result = joined.map_err(|err| format!("import task failed: {err}"))?;

        match result {
            Ok((report, side_blocks)) => {
                summary.height = report.height;
                summary.stored = report.stored;
                summary.rolled_back = report.rolled_back;
                summary.side_blocks = side_blocks;
                log_info!(
                    "import done: {} blocks stored, {} rolled back, {} side chain blocks, tip at {} ({:.1}s)",
                    report.stored,
                    report.rolled_back,
                    side_blocks,
                    report.height,
                    start_time.elapsed().as_secs_f64()
                );
            }
            Err(err) => {
                if let ChainStateError::Incomplete { progress, .. } = &err {
                    log_warn!("stopped partway: {progress}");
                }
                return Err(match err.root() {
                    ChainStateError::Canceled { height } => {
                        format!("import canceled; tip left at height {height}")
                    }
                    _ => err.to_string(),
                });
            }
        }
    }

    Ok(summary)
}

/// Runs store work off the async runtime.
async fn blocking<T, E>(what: &str, f: impl FnOnce() -> Result<T, E> + Send + 'static) -> Result<T, String>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|err| err.to_string()),
        Err(err) => Err(format!("{what} task failed: {err}")),
    }
}

/// First ctrl-c stops between blocks; a second one also aborts the query in
/// flight.
fn spawn_signal_handler(cancel: Arc<AtomicBool>, store_cancel: Arc<AtomicBool>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            log_warn!("failed to install ctrl-c handler");
            return;
        }
        log_info!("Signal received; stopping after the current block.");
        cancel.store(true, Ordering::SeqCst);
        if tokio::signal::ctrl_c().await.is_ok() {
            log_warn!("Second signal received; aborting the running query.");
            store_cancel.store(true, Ordering::SeqCst);
        }
    })
}

fn maintain_indexes(store: &Store, create: bool) -> Result<(), StoreError> {
    store.write(|tx| {
        schema::create_tables(tx)?;
        if create {
            let created = schema::create_indexes(tx)?;
            println!("created {created} indexes");
        } else {
            let dropped = schema::drop_indexes(tx)?;
            println!("dropped {dropped} indexes");
        }
        Ok(())
    })
}

fn print_status(db: &ChainDb) -> Result<(), ChainStateError> {
    let (row, counts, indexes) = db.store().read(|conn| -> Result<_, StoreError> {
        let row = meta::load_meta(conn)?;
        let counts = Table::ALL
            .iter()
            .map(|table| count_rows(conn, *table).map(|count| (table.name(), count)))
            .collect::<Result<Vec<_>, _>>()?;
        let indexes = schema::existing_indexes(conn)?;
        Ok((row, counts, indexes))
    })?;

    let tip = db.best_block();
    println!("network: {}", db.params().network.name());
    println!("tip: {} at {}", tip.hash_str(), tip.height);
    if let Some(row) = row {
        println!(
            "meta: best {} at {}, schema {}, ibd complete {}",
            row.best_block_hash, row.best_block_height, row.schema_version, row.ibd_complete
        );
    }
    println!("indexes: {}", indexes.len());
    for (name, count) in counts {
        println!("  {name:<14} {count}");
    }
    Ok(())
}
