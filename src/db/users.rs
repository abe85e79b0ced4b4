//! User rows and credit counters

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::sqlite_err;
use crate::error::LedgerError;

/// User row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRow {
    pub user_id: i64,
    pub handle: Option<String>,
    /// Lifetime confirmed-action credit
    pub confirmed_actions: i64,
    pub created_at: String,
}

impl UserRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            handle: row.get("handle")?,
            confirmed_actions: row.get("confirmed_actions")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Insert a user on first interaction, or refresh the handle on repeat visits
pub fn upsert_user(
    conn: &Connection,
    user_id: i64,
    handle: Option<&str>,
) -> Result<(), LedgerError> {
    conn.execute(
        r#"
        INSERT INTO users (user_id, handle) VALUES (?, ?)
        ON CONFLICT(user_id) DO UPDATE SET handle = COALESCE(excluded.handle, handle)
        "#,
        params![user_id, handle],
    )
    .map_err(|e| sqlite_err("Upsert user failed", e))?;
    Ok(())
}

/// Get user by ID
pub fn get_user(conn: &Connection, user_id: i64) -> Result<Option<UserRow>, LedgerError> {
    let mut stmt = conn
        .prepare("SELECT * FROM users WHERE user_id = ?")
        .map_err(|e| sqlite_err("Prepare failed", e))?;

    let mut rows = stmt
        .query(params![user_id])
        .map_err(|e| sqlite_err("Query failed", e))?;

    match rows.next().map_err(|e| sqlite_err("Row fetch failed", e))? {
        Some(row) => Ok(Some(
            UserRow::from_row(row).map_err(|e| sqlite_err("Row parse failed", e))?,
        )),
        None => Ok(None),
    }
}

/// Increment the lifetime confirmed-action counter. Called inside the
/// confirmation transaction in `actions::resolve`.
pub fn add_credit(conn: &Connection, user_id: i64) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE users SET confirmed_actions = confirmed_actions + 1 WHERE user_id = ?",
        params![user_id],
    )
    .map_err(|e| sqlite_err("Credit update failed", e))?;
    Ok(())
}
