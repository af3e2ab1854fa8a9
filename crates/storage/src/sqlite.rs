use std::cell::Cell;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chaindex_log::log_debug;
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::StoreError;

/// SQLite VM instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 4_000;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
enum Interrupt {
    #[default]
    None,
    Timeout,
    Canceled,
}

thread_local! {
    // The progress handler runs on the thread that executes the statement,
    // which is the thread holding the connection lock.
    static INTERRUPT: Cell<Interrupt> = const { Cell::new(Interrupt::None) };
}

pub(crate) fn interrupt_error() -> StoreError {
    match INTERRUPT.with(|cell| cell.replace(Interrupt::None)) {
        Interrupt::Canceled => StoreError::Canceled,
        Interrupt::Timeout | Interrupt::None => StoreError::Timeout,
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StoreOptions {
    /// Deadline for each `read`/`write` call. `None` disables it.
    pub query_timeout: Option<Duration>,
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            query_timeout: Some(Duration::from_secs(3_600)),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Store {
    conn: Mutex<Connection>,
    options: StoreOptions,
    cancel: Arc<AtomicBool>,
}

impl Store {
    pub fn open(path: &Path, options: StoreOptions) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        log_debug!("opened {} (journal_mode={mode})", path.display());
        Self::from_connection(conn, options)
    }

    pub fn open_in_memory(options: StoreOptions) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?, options)
    }

    fn from_connection(conn: Connection, options: StoreOptions) -> Result<Self, StoreError> {
        conn.busy_timeout(options.busy_timeout)?;
        conn.set_prepared_statement_cache_capacity(64);
        Ok(Self {
            conn: Mutex::new(conn),
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Flag that aborts whichever query is running and every later one until cleared.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn clear_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, conn: &Connection) -> Result<(), StoreError> {
        INTERRUPT.with(|cell| cell.set(Interrupt::None));
        if self.cancel.load(Ordering::SeqCst) {
            return Err(StoreError::Canceled);
        }
        let deadline = self.options.query_timeout.map(|timeout| Instant::now() + timeout);
        let cancel = Arc::clone(&self.cancel);
        conn.progress_handler(
            PROGRESS_INTERVAL,
            Some(move || {
                let reason = if cancel.load(Ordering::Relaxed) {
                    Interrupt::Canceled
                } else if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    Interrupt::Timeout
                } else {
                    return false;
                };
                INTERRUPT.with(|cell| cell.set(reason));
                true
            }),
        );
        Ok(())
    }

    fn disarm(conn: &Connection) {
        conn.progress_handler(0, None::<fn() -> bool>);
    }

    /// Runs read-only work against the connection under the query deadline.
    pub fn read<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let conn = self.lock();
        self.arm(&conn)?;
        let result = f(&conn);
        Self::disarm(&conn);
        result
    }

    /// Runs `f` inside one immediate transaction. The transaction commits only
    /// when `f` succeeds; any error rolls it back.
    pub fn write<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.lock();
        self.arm(&conn)?;
        let result = Self::run_transaction(&mut conn, f);
        Self::disarm(&conn);
        result
    }

    fn run_transaction<T, E>(
        conn: &mut Connection,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(timeout: Option<Duration>) -> Store {
        Store::open_in_memory(StoreOptions {
            query_timeout: timeout,
            busy_timeout: Duration::from_millis(10),
        })
        .expect("open")
    }

    const SLOW_QUERY: &str = "WITH RECURSIVE spin(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM spin) \
                              SELECT COUNT(*) FROM spin";

    #[test]
    fn deadline_surfaces_as_timeout() {
        let store = store(Some(Duration::from_millis(20)));
        let err = store
            .read(|conn| -> Result<i64, StoreError> {
                Ok(conn.query_row(SLOW_QUERY, [], |row| row.get(0))?)
            })
            .expect_err("should time out");
        assert!(matches!(err, StoreError::Timeout), "{err}");
    }

    #[test]
    fn cancel_flag_surfaces_as_canceled() {
        let store = store(None);
        store.cancel();
        let err = store
            .read(|conn| -> Result<i64, StoreError> {
                Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?)
            })
            .expect_err("canceled");
        assert!(matches!(err, StoreError::Canceled));

        store.clear_cancel();
        let one = store
            .read(|conn| -> Result<i64, StoreError> {
                Ok(conn.query_row("SELECT 1", [], |row| row.get(0))?)
            })
            .expect("cleared");
        assert_eq!(one, 1);
    }

    #[test]
    fn failed_write_rolls_back() {
        let store = store(None);
        store
            .write(|tx| -> Result<(), StoreError> {
                tx.execute_batch("CREATE TABLE t (v INTEGER)")?;
                Ok(())
            })
            .expect("create");
        let result = store.write(|tx| -> Result<(), StoreError> {
            tx.execute("INSERT INTO t (v) VALUES (1)", [])?;
            Err(StoreError::Corruption("abort".into()))
        });
        assert!(result.is_err());
        let count = store
            .read(|conn| -> Result<i64, StoreError> {
                Ok(conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))?)
            })
            .expect("count");
        assert_eq!(count, 0);
    }
}
