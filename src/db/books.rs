//! Book queue operations
//!
//! Owns the queue-position arithmetic: dense 1-based positions per category,
//! the advertised front window, predecessor swaps, and the shift-down that
//! keeps positions contiguous after a removal. Every read-modify-write runs
//! inside a single transaction.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{history, sqlite_err};
use crate::error::LedgerError;

/// Paid/free partition. Queues, windows, and credit pools are independent
/// per category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Paid,
    Free,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Paid => "paid",
            Category::Free => "free",
        }
    }

    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        match s {
            "paid" => Ok(Category::Paid),
            "free" => Ok(Category::Free),
            other => Err(LedgerError::Internal(format!("Unknown category: {}", other))),
        }
    }

    pub const ALL: [Category; 2] = [Category::Paid, Category::Free];
}

impl FromSql for Category {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Category::parse(s).map_err(|e| FromSqlError::Other(e.to_string().into()))
    }
}

impl ToSql for Category {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Book lifecycle status. Completion deletes the row, so `completed` never
/// persists; it exists for symmetry with the storage CHECK constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookStatus {
    Queued,
    Advertised,
    Completed,
}

impl BookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookStatus::Queued => "queued",
            BookStatus::Advertised => "advertised",
            BookStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        match s {
            "queued" => Ok(BookStatus::Queued),
            "advertised" => Ok(BookStatus::Advertised),
            "completed" => Ok(BookStatus::Completed),
            other => Err(LedgerError::Internal(format!(
                "Unknown book status: {}",
                other
            ))),
        }
    }
}

impl FromSql for BookStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        BookStatus::parse(s).map_err(|e| FromSqlError::Other(e.to_string().into()))
    }
}

impl ToSql for BookStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Book row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookRow {
    pub book_id: i64,
    pub user_id: i64,
    pub title: String,
    pub link: String,
    pub price: f64,
    pub category: Category,
    pub confirmed_actions: i64,
    /// Promotion headroom earned by the owner helping other authors
    pub actions_limit: i64,
    pub queue_position: i64,
    pub status: BookStatus,
    pub created_at: String,
    /// Set the first time the book enters the advertised window; sticky
    /// across later window churn.
    pub advertised_since: Option<String>,
    pub admin_exempt: bool,
}

impl BookRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            book_id: row.get("book_id")?,
            user_id: row.get("user_id")?,
            title: row.get("title")?,
            link: row.get("link")?,
            price: row.get("price")?,
            category: row.get("category")?,
            confirmed_actions: row.get("confirmed_actions")?,
            actions_limit: row.get("actions_limit")?,
            queue_position: row.get("queue_position")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            advertised_since: row.get("advertised_since")?,
            admin_exempt: row.get::<_, i64>("admin_exempt")? != 0,
        })
    }
}

/// Input for enqueueing a book
#[derive(Debug, Clone)]
pub struct NewBook {
    pub user_id: i64,
    pub title: String,
    pub link: String,
    pub price: f64,
    pub category: Category,
    pub admin_exempt: bool,
}

/// Enqueue a book at the back of its category queue and re-evaluate the
/// advertised window. Position assignment and insert are one transaction so
/// two concurrent enqueues cannot claim the same slot.
pub fn insert_book(
    conn: &mut Connection,
    input: &NewBook,
    window_size: u32,
) -> Result<BookRow, LedgerError> {
    let tx = conn
        .transaction()
        .map_err(|e| sqlite_err("Transaction failed", e))?;

    let position: i64 = tx
        .query_row(
            r#"
            SELECT COALESCE(MAX(queue_position), 0) + 1 FROM books
            WHERE category = ? AND status != 'completed'
            "#,
            params![input.category],
            |row| row.get(0),
        )
        .map_err(|e| sqlite_err("Position query failed", e))?;

    tx.execute(
        r#"
        INSERT INTO books (user_id, title, link, price, category, queue_position, admin_exempt)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        params![
            input.user_id,
            input.title,
            input.link,
            input.price,
            input.category,
            position,
            input.admin_exempt as i64,
        ],
    )
    .map_err(|e| sqlite_err("Insert book failed", e))?;

    let book_id = tx.last_insert_rowid();

    refresh_window(&tx, input.category, window_size)?;

    let book = get_book(&tx, book_id)?
        .ok_or_else(|| LedgerError::Internal("Inserted book vanished".to_string()))?;

    tx.commit().map_err(|e| sqlite_err("Commit failed", e))?;

    debug!(book_id, position, category = input.category.as_str(), "Book enqueued");
    Ok(book)
}

/// Re-evaluate the advertised window for a category.
///
/// Two-phase: reset every advertised book to queued, then mark the K
/// lowest-position books advertised. Selection is purely by position, so the
/// result is correct under arbitrary prior shuffles. `advertised_since` is
/// never reset; it is set only where still NULL, so re-entering the window
/// keeps the original timestamp. Must run inside the caller's transaction.
pub fn refresh_window(
    conn: &Connection,
    category: Category,
    window_size: u32,
) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE books SET status = 'queued' WHERE category = ? AND status = 'advertised'",
        params![category],
    )
    .map_err(|e| sqlite_err("Window reset failed", e))?;

    conn.execute(
        r#"
        UPDATE books
        SET status = 'advertised',
            advertised_since = COALESCE(advertised_since, datetime('now'))
        WHERE book_id IN (
            SELECT book_id FROM books
            WHERE category = ? AND status != 'completed'
            ORDER BY queue_position ASC
            LIMIT ?
        )
        "#,
        params![category, window_size as i64],
    )
    .map_err(|e| sqlite_err("Window select failed", e))?;

    Ok(())
}

/// Remove a book from the active set: delete it, close the position gap, and
/// re-evaluate the window. Used for both completion and expiration (the
/// latter also drops the book's actions). Idempotent: an absent id is a
/// no-op returning false.
pub fn remove_book(
    conn: &mut Connection,
    book_id: i64,
    delete_actions: bool,
    window_size: u32,
) -> Result<bool, LedgerError> {
    let tx = conn
        .transaction()
        .map_err(|e| sqlite_err("Transaction failed", e))?;

    let found: Option<(Category, i64)> = tx
        .query_row(
            "SELECT category, queue_position FROM books WHERE book_id = ?",
            params![book_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| sqlite_err("Book lookup failed", e))?;

    let Some((category, position)) = found else {
        return Ok(false);
    };

    if delete_actions {
        tx.execute("DELETE FROM actions WHERE book_id = ?", params![book_id])
            .map_err(|e| sqlite_err("Delete actions failed", e))?;
    }

    tx.execute("DELETE FROM books WHERE book_id = ?", params![book_id])
        .map_err(|e| sqlite_err("Delete book failed", e))?;

    tx.execute(
        r#"
        UPDATE books SET queue_position = queue_position - 1
        WHERE category = ? AND queue_position > ?
        "#,
        params![category, position],
    )
    .map_err(|e| sqlite_err("Position shift failed", e))?;

    refresh_window(&tx, category, window_size)?;

    tx.commit().map_err(|e| sqlite_err("Commit failed", e))?;

    debug!(book_id, position, category = category.as_str(), "Book removed from queue");
    Ok(true)
}

/// Move a book one position toward the front by swapping with its
/// predecessor. Returns false when the book is absent or already first.
/// Window re-evaluation after the swap is the caller's choice.
pub fn promote_book(
    conn: &mut Connection,
    book_id: i64,
    reason: &str,
    refresh: bool,
    window_size: u32,
) -> Result<bool, LedgerError> {
    let tx = conn
        .transaction()
        .map_err(|e| sqlite_err("Transaction failed", e))?;

    let found: Option<(i64, Category)> = tx
        .query_row(
            "SELECT queue_position, category FROM books WHERE book_id = ?",
            params![book_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| sqlite_err("Book lookup failed", e))?;

    let Some((position, category)) = found else {
        return Ok(false);
    };

    if position <= 1 {
        return Ok(false);
    }

    // Swap with the immediate predecessor
    tx.execute(
        "UPDATE books SET queue_position = ? WHERE category = ? AND queue_position = ?",
        params![position, category, position - 1],
    )
    .map_err(|e| sqlite_err("Predecessor move failed", e))?;

    tx.execute(
        "UPDATE books SET queue_position = ? WHERE book_id = ?",
        params![position - 1, book_id],
    )
    .map_err(|e| sqlite_err("Book move failed", e))?;

    history::record(&tx, book_id, Some(position), Some(position - 1), reason)?;

    if refresh {
        refresh_window(&tx, category, window_size)?;
    }

    tx.commit().map_err(|e| sqlite_err("Commit failed", e))?;

    debug!(book_id, from = position, to = position - 1, "Book promoted");
    Ok(true)
}

/// Get book by ID
pub fn get_book(conn: &Connection, book_id: i64) -> Result<Option<BookRow>, LedgerError> {
    conn.query_row(
        "SELECT * FROM books WHERE book_id = ?",
        params![book_id],
        |row| BookRow::from_row(row),
    )
    .optional()
    .map_err(|e| sqlite_err("Book query failed", e))
}

/// Books currently in the advertised window, front first
pub fn advertised(conn: &Connection, category: Category) -> Result<Vec<BookRow>, LedgerError> {
    query_books(
        conn,
        r#"
        SELECT * FROM books
        WHERE category = ? AND status = 'advertised'
        ORDER BY queue_position ASC
        "#,
        params![category],
    )
}

/// Full queue for a category (advertised and waiting), front first
pub fn queue_books(conn: &Connection, category: Category) -> Result<Vec<BookRow>, LedgerError> {
    query_books(
        conn,
        r#"
        SELECT * FROM books
        WHERE category = ? AND status != 'completed'
        ORDER BY queue_position ASC
        "#,
        params![category],
    )
}

/// All of a user's non-completed books
pub fn user_books(conn: &Connection, user_id: i64) -> Result<Vec<BookRow>, LedgerError> {
    query_books(
        conn,
        r#"
        SELECT * FROM books
        WHERE user_id = ? AND status != 'completed'
        ORDER BY category, created_at DESC
        "#,
        params![user_id],
    )
}

/// A user's non-completed book in one category, if any
pub fn user_book_in_category(
    conn: &Connection,
    user_id: i64,
    category: Category,
) -> Result<Option<BookRow>, LedgerError> {
    conn.query_row(
        r#"
        SELECT * FROM books
        WHERE user_id = ? AND category = ? AND status != 'completed'
        ORDER BY created_at DESC LIMIT 1
        "#,
        params![user_id, category],
        |row| BookRow::from_row(row),
    )
    .optional()
    .map_err(|e| sqlite_err("Book query failed", e))
}

/// Increment a book's confirmed-action count. Runs inside the confirmation
/// transaction in `actions::resolve`.
pub fn add_confirmed(conn: &Connection, book_id: i64) -> Result<(), LedgerError> {
    conn.execute(
        "UPDATE books SET confirmed_actions = confirmed_actions + 1 WHERE book_id = ?",
        params![book_id],
    )
    .map_err(|e| sqlite_err("Confirmed count update failed", e))?;
    Ok(())
}

/// Grow the action-limit budget on all of a user's active books. The reward
/// for helping another author: exactly +1 per confirmation.
pub fn grow_budget(conn: &Connection, user_id: i64) -> Result<(), LedgerError> {
    conn.execute(
        r#"
        UPDATE books SET actions_limit = actions_limit + 1
        WHERE user_id = ? AND status != 'completed'
        "#,
        params![user_id],
    )
    .map_err(|e| sqlite_err("Budget update failed", e))?;
    Ok(())
}

/// Advertised paid books below the completion threshold whose window time ran
/// out. `cutoff` is a UTC datetime string; older `advertised_since` qualifies.
pub fn expired_paid(
    conn: &Connection,
    required: u32,
    cutoff: &str,
) -> Result<Vec<BookRow>, LedgerError> {
    query_books(
        conn,
        r#"
        SELECT * FROM books
        WHERE category = 'paid'
          AND status = 'advertised'
          AND confirmed_actions < ?
          AND advertised_since IS NOT NULL
          AND advertised_since < ?
        ORDER BY queue_position ASC
        "#,
        params![required as i64, cutoff],
    )
}

fn query_books(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<BookRow>, LedgerError> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| sqlite_err("Prepare failed", e))?;

    let rows = stmt
        .query_map(params, |row| BookRow::from_row(row))
        .map_err(|e| sqlite_err("Query failed", e))?;

    let mut results = vec![];
    for row in rows {
        results.push(row.map_err(|e| sqlite_err("Row parse failed", e))?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{schema, users};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        conn
    }

    fn book(user_id: i64, category: Category) -> NewBook {
        NewBook {
            user_id,
            title: format!("Book of user {}", user_id),
            link: "https://example.com/b".to_string(),
            price: 0.0,
            category,
            admin_exempt: true,
        }
    }

    fn positions(conn: &Connection, category: Category) -> Vec<i64> {
        queue_books(conn, category)
            .unwrap()
            .iter()
            .map(|b| b.queue_position)
            .collect()
    }

    #[test]
    fn positions_are_dense_and_windowed() {
        let mut conn = test_conn();
        for uid in 1..=6 {
            users::upsert_user(&conn, uid, None).unwrap();
            insert_book(&mut conn, &book(uid, Category::Free), 5).unwrap();
        }

        assert_eq!(positions(&conn, Category::Free), vec![1, 2, 3, 4, 5, 6]);

        let front = advertised(&conn, Category::Free).unwrap();
        assert_eq!(front.len(), 5);
        assert!(front.iter().all(|b| b.status == BookStatus::Advertised));

        let last = queue_books(&conn, Category::Free).unwrap().pop().unwrap();
        assert_eq!(last.status, BookStatus::Queued);
        assert!(last.advertised_since.is_none());
    }

    #[test]
    fn categories_have_independent_positions() {
        let mut conn = test_conn();
        users::upsert_user(&conn, 1, None).unwrap();
        users::upsert_user(&conn, 2, None).unwrap();
        insert_book(&mut conn, &book(1, Category::Free), 5).unwrap();
        insert_book(&mut conn, &book(2, Category::Paid), 5).unwrap();

        assert_eq!(positions(&conn, Category::Free), vec![1]);
        assert_eq!(positions(&conn, Category::Paid), vec![1]);
    }

    #[test]
    fn remove_shifts_and_is_idempotent() {
        let mut conn = test_conn();
        let mut ids = vec![];
        for uid in 1..=3 {
            users::upsert_user(&conn, uid, None).unwrap();
            ids.push(insert_book(&mut conn, &book(uid, Category::Free), 5).unwrap().book_id);
        }

        assert!(remove_book(&mut conn, ids[0], false, 5).unwrap());
        assert_eq!(positions(&conn, Category::Free), vec![1, 2]);

        // Second removal of the same id is a no-op and must not double-shift
        assert!(!remove_book(&mut conn, ids[0], false, 5).unwrap());
        assert_eq!(positions(&conn, Category::Free), vec![1, 2]);
    }

    #[test]
    fn promote_swaps_with_predecessor_only() {
        let mut conn = test_conn();
        let mut ids = vec![];
        for uid in 1..=3 {
            users::upsert_user(&conn, uid, None).unwrap();
            ids.push(insert_book(&mut conn, &book(uid, Category::Free), 5).unwrap().book_id);
        }

        assert!(promote_book(&mut conn, ids[2], "extra_activity", true, 5).unwrap());
        let queue = queue_books(&conn, Category::Free).unwrap();
        let order: Vec<i64> = queue.iter().map(|b| b.book_id).collect();
        assert_eq!(order, vec![ids[0], ids[2], ids[1]]);

        // Front book cannot be promoted further
        assert!(!promote_book(&mut conn, ids[0], "extra_activity", true, 5).unwrap());
        // Unknown book fails silently
        assert!(!promote_book(&mut conn, 9999, "extra_activity", true, 5).unwrap());
    }

    #[test]
    fn promote_records_history() {
        let mut conn = test_conn();
        users::upsert_user(&conn, 1, None).unwrap();
        users::upsert_user(&conn, 2, None).unwrap();
        insert_book(&mut conn, &book(1, Category::Free), 5).unwrap();
        let second = insert_book(&mut conn, &book(2, Category::Free), 5).unwrap();

        promote_book(&mut conn, second.book_id, "extra_activity", true, 5).unwrap();

        let trail = history::for_book(&conn, second.book_id).unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].old_position, Some(2));
        assert_eq!(trail[0].new_position, Some(1));
        assert_eq!(trail[0].reason.as_deref(), Some("extra_activity"));
    }

    #[test]
    fn window_membership_follows_position_after_promote() {
        let mut conn = test_conn();
        let mut ids = vec![];
        for uid in 1..=3 {
            users::upsert_user(&conn, uid, None).unwrap();
            ids.push(insert_book(&mut conn, &book(uid, Category::Free), 2).unwrap().book_id);
        }

        // Window K=2: third book starts outside
        let front: Vec<i64> = advertised(&conn, Category::Free)
            .unwrap()
            .iter()
            .map(|b| b.book_id)
            .collect();
        assert_eq!(front, vec![ids[0], ids[1]]);

        // Promoting it across the boundary swaps it in
        promote_book(&mut conn, ids[2], "extra_activity", true, 2).unwrap();
        let front: Vec<i64> = advertised(&conn, Category::Free)
            .unwrap()
            .iter()
            .map(|b| b.book_id)
            .collect();
        assert_eq!(front, vec![ids[0], ids[2]]);
    }

    #[test]
    fn advertised_since_survives_window_exit_and_reentry() {
        let mut conn = test_conn();
        users::upsert_user(&conn, 1, None).unwrap();
        users::upsert_user(&conn, 2, None).unwrap();
        let first = insert_book(&mut conn, &book(1, Category::Free), 1).unwrap();
        let second = insert_book(&mut conn, &book(2, Category::Free), 1).unwrap();

        let stamp = get_book(&conn, first.book_id)
            .unwrap()
            .unwrap()
            .advertised_since
            .expect("front book must carry a timestamp");

        // Push the first book out of the K=1 window, then bring it back
        promote_book(&mut conn, second.book_id, "extra_activity", true, 1).unwrap();
        let out = get_book(&conn, first.book_id).unwrap().unwrap();
        assert_eq!(out.status, BookStatus::Queued);
        assert_eq!(out.advertised_since.as_deref(), Some(stamp.as_str()));

        promote_book(&mut conn, first.book_id, "extra_activity", true, 1).unwrap();
        let back = get_book(&conn, first.book_id).unwrap().unwrap();
        assert_eq!(back.status, BookStatus::Advertised);
        assert_eq!(back.advertised_since.as_deref(), Some(stamp.as_str()));
    }
}
