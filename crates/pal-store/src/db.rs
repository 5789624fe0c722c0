use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::schema;
use crate::{Error, Result};

/// Bounded retry policy for write transactions that hit SQLITE_BUSY.
const WRITE_RETRIES: u32 = 5;
const BACKOFF_BASE_MS: u64 = 10;

/// Owns the SQLite connection. Multi-entity writes go through [`Database::with_tx`]
/// so partial writes are never observable; the retry loop handles contention
/// from other processes sharing the file.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_millis(250))?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside one immediate (write) transaction. On SQLITE_BUSY the
    /// whole transaction is retried with exponential backoff; after
    /// [`WRITE_RETRIES`] attempts the error is surfaced as `RetryExceeded`.
    ///
    /// `f` must be safe to re-run from scratch: an aborted attempt leaves no
    /// side effects.
    pub fn with_tx<T>(&mut self, mut f: impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match self.try_tx(&mut f) {
                Err(err) if is_busy(&err) && attempt < WRITE_RETRIES => {
                    let backoff = BACKOFF_BASE_MS << attempt;
                    std::thread::sleep(Duration::from_millis(backoff));
                    attempt += 1;
                }
                Err(err) if is_busy(&err) => {
                    return Err(Error::RetryExceeded {
                        attempts: WRITE_RETRIES,
                    });
                }
                other => return other,
            }
        }
    }

    fn try_tx<T>(&mut self, f: &mut impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

fn is_busy(err: &Error) -> bool {
    match err {
        Error::Database(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

/// Cheap-to-clone handle shared by every service. Readers borrow the
/// connection; writers get the transactional closure.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Database>>,
}

impl Store {
    pub fn open(db_path: &Path) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Database::open(db_path)?)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(Database::open_in_memory()?)),
        })
    }

    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.inner.lock().unwrap();
        f(db.conn())
    }

    pub fn write<T>(&self, f: impl FnMut(&Transaction) -> Result<T>) -> Result<T> {
        let mut db = self.inner.lock().unwrap();
        db.with_tx(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join(".pal").join("pal.db");

        let _db = Database::open(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("pal.db");

        drop(Database::open(&db_path).unwrap());
        let _again = Database::open(&db_path).unwrap();
    }

    #[test]
    fn test_tx_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();

        let result: Result<()> = store.write(|tx| {
            tx.execute(
                "INSERT INTO locks (resource, session_id, acquired_at) VALUES ('r', 's', 't')",
                [],
            )?;
            Err(Error::Query("forced abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM locks", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
