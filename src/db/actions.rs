//! Action verification state machine
//!
//! An action is one user's verified contribution (purchase, rating, review,
//! subscription) toward another author's book. Created pending; transitions
//! exactly once to confirmed, rejected, or auto_confirmed. Confirmation side
//! effects (three counter increments) commit atomically with the status
//! write.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{books, sqlite_err, users};
use crate::db::books::Category;
use crate::error::LedgerError;

/// What the actor did for the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Purchase,
    Rating,
    Review,
    Subscribe,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Purchase => "purchase",
            ActionKind::Rating => "rating",
            ActionKind::Review => "review",
            ActionKind::Subscribe => "subscribe",
        }
    }

    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        match s {
            "purchase" => Ok(ActionKind::Purchase),
            "rating" => Ok(ActionKind::Rating),
            "review" => Ok(ActionKind::Review),
            "subscribe" => Ok(ActionKind::Subscribe),
            other => Err(LedgerError::Internal(format!(
                "Unknown action kind: {}",
                other
            ))),
        }
    }
}

impl FromSql for ActionKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        ActionKind::parse(s).map_err(|e| FromSqlError::Other(e.to_string().into()))
    }
}

impl ToSql for ActionKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Action lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Confirmed,
    Rejected,
    AutoConfirmed,
}

impl ActionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Confirmed => "confirmed",
            ActionStatus::Rejected => "rejected",
            ActionStatus::AutoConfirmed => "auto_confirmed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, LedgerError> {
        match s {
            "pending" => Ok(ActionStatus::Pending),
            "confirmed" => Ok(ActionStatus::Confirmed),
            "rejected" => Ok(ActionStatus::Rejected),
            "auto_confirmed" => Ok(ActionStatus::AutoConfirmed),
            other => Err(LedgerError::Internal(format!(
                "Unknown action status: {}",
                other
            ))),
        }
    }

    /// Confirmed and auto_confirmed are equivalent for side effects
    pub fn is_confirmed(&self) -> bool {
        matches!(self, ActionStatus::Confirmed | ActionStatus::AutoConfirmed)
    }
}

impl FromSql for ActionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        ActionStatus::parse(s).map_err(|e| FromSqlError::Other(e.to_string().into()))
    }
}

impl ToSql for ActionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

/// Action row from database
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRow {
    pub action_id: i64,
    pub book_id: i64,
    /// The acting user (not the book owner)
    pub user_id: i64,
    pub kind: ActionKind,
    /// Opaque evidence reference; never interpreted by the core
    pub evidence_ref: Option<String>,
    pub status: ActionStatus,
    pub created_at: String,
    pub confirmed_at: Option<String>,
}

impl ActionRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            action_id: row.get("action_id")?,
            book_id: row.get("book_id")?,
            user_id: row.get("user_id")?,
            kind: row.get("kind")?,
            evidence_ref: row.get("evidence_ref")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
            confirmed_at: row.get("confirmed_at")?,
        })
    }
}

/// A pending action joined with book and actor context, for the owner's
/// review queue
#[derive(Debug, Clone, Serialize)]
pub struct PendingAction {
    pub action: ActionRow,
    pub book_title: String,
    pub book_owner_id: i64,
    pub actor_handle: Option<String>,
}

/// Outcome of a resolve call
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The pending action transitioned; side effects applied
    Applied(ActionRow),
    /// The action had already left pending; nothing changed
    AlreadyResolved(ActionRow),
}

impl Resolution {
    pub fn row(&self) -> &ActionRow {
        match self {
            Resolution::Applied(row) | Resolution::AlreadyResolved(row) => row,
        }
    }
}

/// Create a pending action for a (book, actor) pair. The table's UNIQUE
/// constraint rejects a second attempt for the same pair.
pub fn insert_action(
    conn: &Connection,
    book_id: i64,
    user_id: i64,
    kind: ActionKind,
    evidence_ref: Option<&str>,
) -> Result<ActionRow, LedgerError> {
    conn.execute(
        r#"
        INSERT INTO actions (book_id, user_id, kind, evidence_ref)
        VALUES (?, ?, ?, ?)
        "#,
        params![book_id, user_id, kind, evidence_ref],
    )
    .map_err(|e| match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == ErrorCode::ConstraintViolation =>
        {
            LedgerError::DuplicateAction { book_id, user_id }
        }
        _ => sqlite_err("Insert action failed", e),
    })?;

    let action_id = conn.last_insert_rowid();
    get_action(conn, action_id)?
        .ok_or_else(|| LedgerError::Internal("Inserted action vanished".to_string()))
}

/// Get action by ID
pub fn get_action(conn: &Connection, action_id: i64) -> Result<Option<ActionRow>, LedgerError> {
    conn.query_row(
        "SELECT * FROM actions WHERE action_id = ?",
        params![action_id],
        |row| ActionRow::from_row(row),
    )
    .optional()
    .map_err(|e| sqlite_err("Action query failed", e))
}

/// The action a user holds against a book, if any
pub fn action_for(
    conn: &Connection,
    user_id: i64,
    book_id: i64,
) -> Result<Option<ActionRow>, LedgerError> {
    conn.query_row(
        "SELECT * FROM actions WHERE user_id = ? AND book_id = ?",
        params![user_id, book_id],
        |row| ActionRow::from_row(row),
    )
    .optional()
    .map_err(|e| sqlite_err("Action query failed", e))
}

/// Resolve a pending action. Only `pending` transitions; a resolved action
/// is returned unchanged, so concurrent or repeated resolution applies the
/// counter side effects exactly once.
///
/// On a confirming outcome, the same transaction increments the book's
/// confirmed count, the actor's lifetime credit, and the action-limit budget
/// of the actor's own active books.
pub fn resolve(
    conn: &mut Connection,
    action_id: i64,
    outcome: ActionStatus,
) -> Result<Option<Resolution>, LedgerError> {
    if outcome == ActionStatus::Pending {
        return Err(LedgerError::Internal(
            "Cannot resolve an action back to pending".to_string(),
        ));
    }

    let tx = conn
        .transaction()
        .map_err(|e| sqlite_err("Transaction failed", e))?;

    // confirmed_at marks confirmation time only; rejections leave it NULL
    let sql = if outcome.is_confirmed() {
        r#"
        UPDATE actions
        SET status = ?, confirmed_at = datetime('now')
        WHERE action_id = ? AND status = 'pending'
        "#
    } else {
        "UPDATE actions SET status = ? WHERE action_id = ? AND status = 'pending'"
    };
    let changed = tx
        .execute(sql, params![outcome, action_id])
        .map_err(|e| sqlite_err("Status update failed", e))?;

    let Some(row) = get_action(&tx, action_id)? else {
        return Ok(None);
    };

    if changed == 0 {
        return Ok(Some(Resolution::AlreadyResolved(row)));
    }

    if outcome.is_confirmed() {
        books::add_confirmed(&tx, row.book_id)?;
        users::add_credit(&tx, row.user_id)?;
        books::grow_budget(&tx, row.user_id)?;
    }

    tx.commit().map_err(|e| sqlite_err("Commit failed", e))?;

    debug!(action_id, outcome = outcome.as_str(), "Action resolved");
    Ok(Some(Resolution::Applied(row)))
}

/// Delete a rejected action so its actor can try again. Guarded in SQL:
/// only the actor, only when rejected.
pub fn delete_rejected(
    conn: &Connection,
    action_id: i64,
    actor_id: i64,
) -> Result<bool, LedgerError> {
    let deleted = conn
        .execute(
            "DELETE FROM actions WHERE action_id = ? AND user_id = ? AND status = 'rejected'",
            params![action_id, actor_id],
        )
        .map_err(|e| sqlite_err("Delete action failed", e))?;
    Ok(deleted > 0)
}

/// IDs of pending actions created before the cutoff (UTC datetime string)
pub fn stale_pending(conn: &Connection, cutoff: &str) -> Result<Vec<i64>, LedgerError> {
    let mut stmt = conn
        .prepare("SELECT action_id FROM actions WHERE status = 'pending' AND created_at < ?")
        .map_err(|e| sqlite_err("Prepare failed", e))?;

    let ids: Vec<i64> = stmt
        .query_map(params![cutoff], |row| row.get(0))
        .map_err(|e| sqlite_err("Query failed", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| sqlite_err("Row parse failed", e))?;

    Ok(ids)
}

/// Pending actions awaiting an owner's decision, oldest first
pub fn pending_for_owner(
    conn: &Connection,
    owner_id: i64,
) -> Result<Vec<PendingAction>, LedgerError> {
    let mut stmt = conn
        .prepare(
            r#"
            SELECT a.*, b.title AS book_title, b.user_id AS book_owner_id, u.handle AS actor_handle
            FROM actions a
            JOIN books b ON a.book_id = b.book_id
            JOIN users u ON a.user_id = u.user_id
            WHERE a.status = 'pending' AND b.user_id = ?
            ORDER BY a.created_at ASC
            "#,
        )
        .map_err(|e| sqlite_err("Prepare failed", e))?;

    let rows = stmt
        .query_map(params![owner_id], |row| {
            Ok(PendingAction {
                action: ActionRow::from_row(row)?,
                book_title: row.get("book_title")?,
                book_owner_id: row.get("book_owner_id")?,
                actor_handle: row.get("actor_handle")?,
            })
        })
        .map_err(|e| sqlite_err("Query failed", e))?;

    let mut results = vec![];
    for row in rows {
        results.push(row.map_err(|e| sqlite_err("Row parse failed", e))?);
    }
    Ok(results)
}

/// A user's confirmed/auto_confirmed action count against still-active books
/// of one category. This is the credit pool the submission gate checks;
/// actions on completed (deleted) books no longer count.
pub fn confirmed_credit(
    conn: &Connection,
    user_id: i64,
    category: Category,
) -> Result<i64, LedgerError> {
    conn.query_row(
        r#"
        SELECT COUNT(*) FROM actions a
        JOIN books b ON a.book_id = b.book_id
        WHERE a.user_id = ?
          AND a.status IN ('confirmed', 'auto_confirmed')
          AND b.category = ?
        "#,
        params![user_id, category],
        |row| row.get(0),
    )
    .map_err(|e| sqlite_err("Credit query failed", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::books::{insert_book, user_book_in_category, NewBook};
    use crate::db::{schema, users};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        conn
    }

    fn seed_book(conn: &mut Connection, user_id: i64, category: Category) -> i64 {
        users::upsert_user(conn, user_id, None).unwrap();
        insert_book(
            conn,
            &NewBook {
                user_id,
                title: "Seeded".to_string(),
                link: "https://example.com".to_string(),
                price: 0.0,
                category,
                admin_exempt: true,
            },
            5,
        )
        .unwrap()
        .book_id
    }

    #[test]
    fn duplicate_pair_is_rejected() {
        let mut conn = test_conn();
        let book_id = seed_book(&mut conn, 1, Category::Free);
        users::upsert_user(&conn, 2, None).unwrap();

        insert_action(&conn, book_id, 2, ActionKind::Review, None).unwrap();
        let err = insert_action(&conn, book_id, 2, ActionKind::Purchase, None).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::DuplicateAction { book_id: b, user_id: 2 } if b == book_id
        ));
    }

    #[test]
    fn confirm_applies_side_effects_once() {
        let mut conn = test_conn();
        let book_id = seed_book(&mut conn, 1, Category::Free);
        // The actor owns an active book of their own; its budget must grow
        let actor_book = seed_book(&mut conn, 2, Category::Paid);

        let action = insert_action(&conn, book_id, 2, ActionKind::Rating, None).unwrap();

        let first = resolve(&mut conn, action.action_id, ActionStatus::Confirmed)
            .unwrap()
            .unwrap();
        assert!(matches!(first, Resolution::Applied(_)));

        // A second confirm is a no-op
        let second = resolve(&mut conn, action.action_id, ActionStatus::Confirmed)
            .unwrap()
            .unwrap();
        assert!(matches!(second, Resolution::AlreadyResolved(_)));

        let book = crate::db::books::get_book(&conn, book_id).unwrap().unwrap();
        assert_eq!(book.confirmed_actions, 1);

        let actor = users::get_user(&conn, 2).unwrap().unwrap();
        assert_eq!(actor.confirmed_actions, 1);

        let budget = crate::db::books::get_book(&conn, actor_book).unwrap().unwrap();
        assert_eq!(budget.actions_limit, 1);
    }

    #[test]
    fn reject_leaves_counters_untouched() {
        let mut conn = test_conn();
        let book_id = seed_book(&mut conn, 1, Category::Free);
        users::upsert_user(&conn, 2, None).unwrap();

        let action = insert_action(&conn, book_id, 2, ActionKind::Subscribe, None).unwrap();
        resolve(&mut conn, action.action_id, ActionStatus::Rejected)
            .unwrap()
            .unwrap();

        let book = crate::db::books::get_book(&conn, book_id).unwrap().unwrap();
        assert_eq!(book.confirmed_actions, 0);
        assert_eq!(users::get_user(&conn, 2).unwrap().unwrap().confirmed_actions, 0);
    }

    #[test]
    fn rejected_action_is_deletable_by_actor_only() {
        let mut conn = test_conn();
        let book_id = seed_book(&mut conn, 1, Category::Free);
        users::upsert_user(&conn, 2, None).unwrap();

        let action = insert_action(&conn, book_id, 2, ActionKind::Review, None).unwrap();
        // Pending actions are not deletable
        assert!(!delete_rejected(&conn, action.action_id, 2).unwrap());

        resolve(&mut conn, action.action_id, ActionStatus::Rejected)
            .unwrap()
            .unwrap();
        // Wrong actor cannot delete
        assert!(!delete_rejected(&conn, action.action_id, 1).unwrap());
        assert!(delete_rejected(&conn, action.action_id, 2).unwrap());

        // The pair is actionable again
        insert_action(&conn, book_id, 2, ActionKind::Review, None).unwrap();
    }

    #[test]
    fn stale_scan_honors_cutoff() {
        let mut conn = test_conn();
        let book_id = seed_book(&mut conn, 1, Category::Free);
        users::upsert_user(&conn, 2, None).unwrap();

        let action = insert_action(&conn, book_id, 2, ActionKind::Purchase, None).unwrap();
        conn.execute(
            "UPDATE actions SET created_at = datetime('now', '-13 hours') WHERE action_id = ?",
            params![action.action_id],
        )
        .unwrap();

        let cutoff_12h = chrono_cutoff_hours(12);
        assert_eq!(stale_pending(&conn, &cutoff_12h).unwrap(), vec![action.action_id]);

        let cutoff_24h = chrono_cutoff_hours(24);
        assert!(stale_pending(&conn, &cutoff_24h).unwrap().is_empty());
    }

    fn chrono_cutoff_hours(hours: i64) -> String {
        (chrono::Utc::now() - chrono::Duration::hours(hours))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }

    #[test]
    fn credit_pools_are_per_category() {
        let mut conn = test_conn();
        let paid_book = seed_book(&mut conn, 1, Category::Paid);
        users::upsert_user(&conn, 2, None).unwrap();

        let action = insert_action(&conn, paid_book, 2, ActionKind::Purchase, None).unwrap();
        resolve(&mut conn, action.action_id, ActionStatus::AutoConfirmed)
            .unwrap()
            .unwrap();

        assert_eq!(confirmed_credit(&conn, 2, Category::Paid).unwrap(), 1);
        assert_eq!(confirmed_credit(&conn, 2, Category::Free).unwrap(), 0);
        assert!(user_book_in_category(&conn, 2, Category::Paid).unwrap().is_none());
    }
}
