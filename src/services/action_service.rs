//! Action verifier - business logic for verified contributions
//!
//! Owns the pending -> confirmed/rejected/auto_confirmed state machine and
//! its side effects: credit increments, budget growth, and the completion
//! check that retires a book once it earned enough confirmations.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::debug;

use crate::config::Config;
use crate::db::actions::{PendingAction, Resolution};
use crate::db::{actions, books, users, ActionKind, ActionRow, ActionStatus, LedgerDb};
use crate::error::LedgerError;

use super::events::{EventBus, LedgerEvent};

/// Owner's verdict on a pending action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Confirmed,
    Rejected,
}

/// Action verifier service
#[derive(Clone)]
pub struct ActionService {
    db: Arc<LedgerDb>,
    events: Arc<EventBus>,
    cfg: Config,
}

impl ActionService {
    /// Create a new action service
    pub fn new(db: Arc<LedgerDb>, events: Arc<EventBus>, cfg: Config) -> Self {
        Self { db, events, cfg }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get action by ID
    pub fn action(&self, action_id: i64) -> Result<Option<ActionRow>, LedgerError> {
        self.db.with_conn(|conn| actions::get_action(conn, action_id))
    }

    /// The action a user holds against a book, if any
    pub fn action_for(&self, user_id: i64, book_id: i64) -> Result<Option<ActionRow>, LedgerError> {
        self.db
            .with_conn(|conn| actions::action_for(conn, user_id, book_id))
    }

    /// Pending actions awaiting one owner's decision, oldest first
    pub fn pending_for_owner(&self, owner_id: i64) -> Result<Vec<PendingAction>, LedgerError> {
        self.db
            .with_conn(|conn| actions::pending_for_owner(conn, owner_id))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Record a pending action for (book, actor). One attempt per pair: an
    /// existing action in any state fails with DuplicateAction until the
    /// actor deletes a rejected one.
    pub fn submit_action(
        &self,
        book_id: i64,
        actor_id: i64,
        actor_handle: Option<&str>,
        kind: ActionKind,
        evidence_ref: Option<&str>,
    ) -> Result<ActionRow, LedgerError> {
        let action = self.db.with_conn(|conn| {
            let Some(book) = books::get_book(conn, book_id)? else {
                return Err(LedgerError::NotFound(format!("Book {}", book_id)));
            };
            if book.user_id == actor_id {
                return Err(LedgerError::EligibilityDenied(
                    "Authors cannot act on their own book".to_string(),
                ));
            }

            users::upsert_user(conn, actor_id, actor_handle)?;
            actions::insert_action(conn, book_id, actor_id, kind, evidence_ref)
        })?;

        self.events.emit(LedgerEvent::ActionSubmitted {
            action_id: action.action_id,
            book_id,
            actor_id,
            kind,
        });

        Ok(action)
    }

    /// Resolve a pending action on the book owner's behalf.
    ///
    /// Only the owner may resolve. An already-resolved action is returned
    /// unchanged (no repeated side effects). A confirming verdict runs the
    /// completion check afterwards.
    pub fn resolve_action(
        &self,
        action_id: i64,
        owner_id: i64,
        outcome: ResolveOutcome,
    ) -> Result<ActionRow, LedgerError> {
        let status = match outcome {
            ResolveOutcome::Confirmed => ActionStatus::Confirmed,
            ResolveOutcome::Rejected => ActionStatus::Rejected,
        };

        let resolution = self.db.with_conn_mut(|conn| {
            let Some(action) = actions::get_action(conn, action_id)? else {
                return Err(LedgerError::NotFound(format!("Action {}", action_id)));
            };
            let Some(book) = books::get_book(conn, action.book_id)? else {
                return Err(LedgerError::NotFound(format!("Book {}", action.book_id)));
            };
            if book.user_id != owner_id {
                return Err(LedgerError::EligibilityDenied(
                    "Only the book owner may resolve this action".to_string(),
                ));
            }

            actions::resolve(conn, action_id, status)?
                .ok_or_else(|| LedgerError::NotFound(format!("Action {}", action_id)))
        })?;

        if let Resolution::Applied(row) = &resolution {
            match status {
                ActionStatus::Confirmed => {
                    self.events.emit(LedgerEvent::ActionConfirmed {
                        action_id: row.action_id,
                        book_id: row.book_id,
                        actor_id: row.user_id,
                        auto: false,
                    });
                    self.check_completion(row.book_id)?;
                }
                ActionStatus::Rejected => {
                    self.events.emit(LedgerEvent::ActionRejected {
                        action_id: row.action_id,
                        book_id: row.book_id,
                        actor_id: row.user_id,
                    });
                }
                _ => {}
            }
        }

        Ok(resolution.row().clone())
    }

    /// Delete a rejected action so the actor can submit a fresh attempt
    pub fn delete_rejected_action(
        &self,
        action_id: i64,
        actor_id: i64,
    ) -> Result<(), LedgerError> {
        let action = self.db.with_conn(|conn| {
            let Some(action) = actions::get_action(conn, action_id)? else {
                return Err(LedgerError::NotFound(format!("Action {}", action_id)));
            };
            if action.user_id != actor_id {
                return Err(LedgerError::EligibilityDenied(
                    "Only the acting user may delete this action".to_string(),
                ));
            }
            if action.status != ActionStatus::Rejected {
                return Err(LedgerError::EligibilityDenied(
                    "Only rejected actions can be deleted".to_string(),
                ));
            }
            actions::delete_rejected(conn, action_id, actor_id)?;
            Ok(action)
        })?;

        self.events.emit(LedgerEvent::ActionDeleted {
            action_id,
            book_id: action.book_id,
            actor_id,
        });
        Ok(())
    }

    /// Auto-confirm pending actions older than the threshold, with the same
    /// side effects as a manual confirmation. Each action resolves in its own
    /// transaction; the pending-only precondition makes a race with manual
    /// resolution a no-op. Returns how many actions transitioned.
    pub fn auto_confirm_stale(&self, threshold_hours: u32) -> Result<usize, LedgerError> {
        let cutoff = (Utc::now() - Duration::hours(threshold_hours as i64))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let stale = self.db.with_conn(|conn| actions::stale_pending(conn, &cutoff))?;

        let mut confirmed = 0;
        for action_id in stale {
            let resolution = self
                .db
                .with_conn_mut(|conn| actions::resolve(conn, action_id, ActionStatus::AutoConfirmed))?;

            if let Some(Resolution::Applied(row)) = resolution {
                confirmed += 1;
                self.events.emit(LedgerEvent::ActionConfirmed {
                    action_id: row.action_id,
                    book_id: row.book_id,
                    actor_id: row.user_id,
                    auto: true,
                });
                self.check_completion(row.book_id)?;
            }
        }

        if confirmed > 0 {
            debug!(confirmed, "Auto-confirmed stale actions");
        }
        Ok(confirmed)
    }

    /// Retire the book if it reached the required confirmation count
    fn check_completion(&self, book_id: i64) -> Result<bool, LedgerError> {
        let completed = self.db.with_conn_mut(|conn| {
            let Some(book) = books::get_book(conn, book_id)? else {
                return Ok(None);
            };
            if book.confirmed_actions < self.cfg.actions_required as i64 {
                return Ok(None);
            }
            books::remove_book(conn, book_id, false, self.cfg.window_size)?;
            Ok(Some(book))
        })?;

        if let Some(book) = completed {
            self.events.emit(LedgerEvent::BookCompleted {
                book_id: book.book_id,
                user_id: book.user_id,
                category: book.category,
            });
            return Ok(true);
        }
        Ok(false)
    }
}
