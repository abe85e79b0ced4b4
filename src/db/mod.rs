//! SQLite ledger store for the promotion exchange
//!
//! Exclusively owns persisted state: users, books, actions, and the
//! position-change audit trail. Engine code never caches positions or
//! statuses outside a transaction.
//!
//! ## Tables
//!
//! - `users` - identity and lifetime confirmed-action credit
//! - `books` - queue entries with dense per-category positions
//! - `actions` - one verification attempt per (book, actor) pair
//! - `position_history` - append-only audit of position changes

pub mod actions;
pub mod books;
pub mod history;
pub mod schema;
pub mod users;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode};
use tracing::{debug, info};

use crate::error::LedgerError;

/// Attempts per operation before a busy database surfaces as StorageConflict
const BUSY_RETRIES: u32 = 3;
const BUSY_BACKOFF: Duration = Duration::from_millis(50);

/// Map a rusqlite error into the ledger taxonomy. Busy/locked become
/// StorageConflict so callers can retry; everything else is internal.
pub(crate) fn sqlite_err(context: &str, e: rusqlite::Error) -> LedgerError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if matches!(err.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
            return LedgerError::StorageConflict(format!("{}: {}", context, e));
        }
    }
    LedgerError::Internal(format!("{}: {}", context, e))
}

/// SQLite database holding all exchange state
pub struct LedgerDb {
    conn: Mutex<Connection>,
}

impl LedgerDb {
    /// Open or create the ledger database
    pub fn open(db_path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("Opening SQLite ledger at {:?}", db_path);

        let conn = Connection::open(db_path).map_err(|e| sqlite_err("Open failed", e))?;

        // WAL for concurrent readers, busy_timeout so writers queue instead
        // of failing immediately. foreign_keys stays off (SQLite's stock
        // default): completion deletes a book while its action rows remain
        // (DESIGN.md §4), and the bundled build flips the default to on.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout=30000; PRAGMA foreign_keys=OFF;",
        )
        .map_err(|e| sqlite_err("Set PRAGMA failed", e))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory SQLite ledger");

        let conn =
            Connection::open_in_memory().map_err(|e| sqlite_err("Open in-memory failed", e))?;

        conn.execute_batch("PRAGMA foreign_keys=OFF;")
            .map_err(|e| sqlite_err("Set PRAGMA failed", e))?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), LedgerError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read-only operation against the connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Run a read-modify-write operation with exclusive access.
    ///
    /// The closure is re-run a bounded number of times when the database
    /// reports contention; each attempt sees the store's committed state, so
    /// a retried operation recomputes positions and counters from scratch.
    pub fn with_conn_mut<F, T>(&self, mut f: F) -> Result<T, LedgerError>
    where
        F: FnMut(&mut Connection) -> Result<T, LedgerError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| LedgerError::Internal(format!("Lock poisoned: {}", e)))?;

        let mut attempt = 0;
        loop {
            match f(&mut conn) {
                Err(LedgerError::StorageConflict(msg)) if attempt < BUSY_RETRIES => {
                    attempt += 1;
                    debug!(attempt, %msg, "Retrying ledger operation after conflict");
                    std::thread::sleep(BUSY_BACKOFF);
                }
                other => return other,
            }
        }
    }

    /// Get overall ledger statistics
    pub fn stats(&self) -> Result<LedgerStats, LedgerError> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<u64, LedgerError> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| n as u64)
                    .map_err(|e| sqlite_err("Count failed", e))
            };

            Ok(LedgerStats {
                total_users: count("SELECT COUNT(*) FROM users")?,
                active_books: count("SELECT COUNT(*) FROM books WHERE status != 'completed'")?,
                paid_books: count(
                    "SELECT COUNT(*) FROM books WHERE category = 'paid' AND status != 'completed'",
                )?,
                free_books: count(
                    "SELECT COUNT(*) FROM books WHERE category = 'free' AND status != 'completed'",
                )?,
                total_actions: count("SELECT COUNT(*) FROM actions")?,
            })
        })
    }
}

/// Ledger statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct LedgerStats {
    pub total_users: u64,
    pub active_books: u64,
    pub paid_books: u64,
    pub free_books: u64,
    pub total_actions: u64,
}

// Re-exports
pub use actions::{ActionKind, ActionRow, ActionStatus};
pub use books::{BookRow, BookStatus, Category, NewBook};
pub use history::HistoryRow;
pub use users::UserRow;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_on_disk_creates_parent_dirs() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("ledger.db");
        let db = LedgerDb::open(&path).unwrap();
        assert!(path.exists());
        let stats = db.stats().unwrap();
        assert_eq!(stats.total_users, 0);
    }

    #[test]
    fn stats_on_empty_db() {
        let db = LedgerDb::open_in_memory().unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.active_books, 0);
        assert_eq!(stats.total_actions, 0);
    }
}
