//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use super::sqlite_err;
use crate::error::LedgerError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new ledger schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating ledger schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, LedgerError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| sqlite_err("Create schema_version failed", e))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<(), LedgerError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| sqlite_err("Clear schema_version failed", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| sqlite_err("Set schema_version failed", e))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(LEDGER_SCHEMA)
        .map_err(|e| sqlite_err("Create ledger tables failed", e))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| sqlite_err("Create indexes failed", e))?;

    Ok(())
}

fn migrate_schema(conn: &Connection, _from_version: i32) -> Result<(), LedgerError> {
    // Migration steps go here as the schema evolves
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Core ledger tables
const LEDGER_SCHEMA: &str = r#"
-- Authors and readers; created on first interaction, never deleted.
-- confirmed_actions is the lifetime credit counter.
CREATE TABLE IF NOT EXISTS users (
    user_id INTEGER PRIMARY KEY,
    handle TEXT,
    confirmed_actions INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Queue entries. queue_position is 1-based and dense per category among
-- non-completed books. Completed books are deleted, not archived.
CREATE TABLE IF NOT EXISTS books (
    book_id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    price REAL NOT NULL DEFAULT 0,
    category TEXT NOT NULL CHECK(category IN ('paid', 'free')),
    confirmed_actions INTEGER NOT NULL DEFAULT 0,
    actions_limit INTEGER NOT NULL DEFAULT 0,
    queue_position INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued'
        CHECK(status IN ('queued', 'advertised', 'completed')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    advertised_since TEXT,
    admin_exempt INTEGER NOT NULL DEFAULT 0,
    FOREIGN KEY (user_id) REFERENCES users(user_id)
);

-- One verification attempt per (book, actor). The UNIQUE constraint is the
-- duplicate-action guard.
CREATE TABLE IF NOT EXISTS actions (
    action_id INTEGER PRIMARY KEY AUTOINCREMENT,
    book_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    kind TEXT NOT NULL CHECK(kind IN ('purchase', 'rating', 'review', 'subscribe')),
    evidence_ref TEXT,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK(status IN ('pending', 'confirmed', 'rejected', 'auto_confirmed')),
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    confirmed_at TEXT,
    FOREIGN KEY (book_id) REFERENCES books(book_id),
    FOREIGN KEY (user_id) REFERENCES users(user_id),
    UNIQUE(book_id, user_id)
);

-- Append-only audit trail; never read by engine logic.
CREATE TABLE IF NOT EXISTS position_history (
    history_id INTEGER PRIMARY KEY AUTOINCREMENT,
    book_id INTEGER NOT NULL,
    old_position INTEGER,
    new_position INTEGER,
    reason TEXT,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    FOREIGN KEY (book_id) REFERENCES books(book_id)
);
"#;

/// Index definitions for fast queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_books_category_status ON books(category, status);
CREATE INDEX IF NOT EXISTS idx_books_category_position ON books(category, queue_position);
CREATE INDEX IF NOT EXISTS idx_books_user ON books(user_id);

CREATE INDEX IF NOT EXISTS idx_actions_status ON actions(status);
CREATE INDEX IF NOT EXISTS idx_actions_book ON actions(book_id);
CREATE INDEX IF NOT EXISTS idx_actions_user ON actions(user_id);

CREATE INDEX IF NOT EXISTS idx_history_book ON position_history(book_id);
"#;
