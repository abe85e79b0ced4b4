//! Position-change audit trail
//!
//! Append-only. Engine logic only writes here; reads exist for operators
//! and tests.

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::sqlite_err;
use crate::error::LedgerError;

/// Audit record for a position change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRow {
    pub history_id: i64,
    pub book_id: i64,
    pub old_position: Option<i64>,
    pub new_position: Option<i64>,
    pub reason: Option<String>,
    pub created_at: String,
}

impl HistoryRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            history_id: row.get("history_id")?,
            book_id: row.get("book_id")?,
            old_position: row.get("old_position")?,
            new_position: row.get("new_position")?,
            reason: row.get("reason")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Append an audit record. Runs inside the caller's transaction.
pub fn record(
    conn: &Connection,
    book_id: i64,
    old_position: Option<i64>,
    new_position: Option<i64>,
    reason: &str,
) -> Result<(), LedgerError> {
    conn.execute(
        r#"
        INSERT INTO position_history (book_id, old_position, new_position, reason)
        VALUES (?, ?, ?, ?)
        "#,
        params![book_id, old_position, new_position, reason],
    )
    .map_err(|e| sqlite_err("History insert failed", e))?;
    Ok(())
}

/// All audit records for a book, oldest first
pub fn for_book(conn: &Connection, book_id: i64) -> Result<Vec<HistoryRow>, LedgerError> {
    let mut stmt = conn
        .prepare(
            "SELECT * FROM position_history WHERE book_id = ? ORDER BY history_id ASC",
        )
        .map_err(|e| sqlite_err("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![book_id], |row| HistoryRow::from_row(row))
        .map_err(|e| sqlite_err("Query failed", e))?;

    let mut results = vec![];
    for row in rows {
        results.push(row.map_err(|e| sqlite_err("Row parse failed", e))?);
    }
    Ok(results)
}
