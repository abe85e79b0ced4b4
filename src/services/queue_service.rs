//! Queue engine - business logic for book submission and queue movement
//!
//! Wraps the book store with validation, the credit-eligibility gate, and
//! event emission. All position arithmetic lives in the db layer inside
//! transactions; this layer never caches positions or statuses.

use std::sync::Arc;

use crate::config::Config;
use crate::db::{self, books, users, BookRow, Category, LedgerDb, NewBook};
use crate::error::LedgerError;

use super::events::{EventBus, LedgerEvent};

/// Title length bounds, in characters
const TITLE_MIN_CHARS: usize = 3;
const TITLE_MAX_CHARS: usize = 200;

/// Request to submit a book into a category queue
#[derive(Debug, Clone)]
pub struct SubmitBook {
    pub user_id: i64,
    pub handle: Option<String>,
    pub title: String,
    pub link: String,
    pub price: f64,
    pub category: Category,
    /// Bypasses the credit gate and the one-book-per-category rule
    pub admin_exempt: bool,
}

/// Per-category view of a user's submission rights
#[derive(Debug, Clone, serde::Serialize)]
pub struct CategoryEligibility {
    /// Confirmed/auto_confirmed actions on active books of this category
    pub credit: i64,
    /// The user's non-completed book in this category, if any
    pub active_book_id: Option<i64>,
    pub can_submit: bool,
}

/// Submission rights across both categories
#[derive(Debug, Clone, serde::Serialize)]
pub struct Eligibility {
    pub paid: CategoryEligibility,
    pub free: CategoryEligibility,
}

impl Eligibility {
    pub fn for_category(&self, category: Category) -> &CategoryEligibility {
        match category {
            Category::Paid => &self.paid,
            Category::Free => &self.free,
        }
    }
}

/// Queue engine service
#[derive(Clone)]
pub struct QueueService {
    db: Arc<LedgerDb>,
    events: Arc<EventBus>,
    cfg: Config,
}

impl QueueService {
    /// Create a new queue service
    pub fn new(db: Arc<LedgerDb>, events: Arc<EventBus>, cfg: Config) -> Self {
        Self { db, events, cfg }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    /// Get book by ID
    pub fn book(&self, book_id: i64) -> Result<Option<BookRow>, LedgerError> {
        self.db.with_conn(|conn| books::get_book(conn, book_id))
    }

    /// Books currently advertised in a category, front first
    pub fn advertised(&self, category: Category) -> Result<Vec<BookRow>, LedgerError> {
        self.db.with_conn(|conn| books::advertised(conn, category))
    }

    /// The full queue of a category, front first
    pub fn queue(&self, category: Category) -> Result<Vec<BookRow>, LedgerError> {
        self.db.with_conn(|conn| books::queue_books(conn, category))
    }

    /// All of a user's active books
    pub fn user_books(&self, user_id: i64) -> Result<Vec<BookRow>, LedgerError> {
        self.db.with_conn(|conn| books::user_books(conn, user_id))
    }

    /// A user's submission rights in both categories
    pub fn eligibility(&self, user_id: i64) -> Result<Eligibility, LedgerError> {
        self.db.with_conn(|conn| {
            let check = |category: Category| -> Result<CategoryEligibility, LedgerError> {
                let credit = db::actions::confirmed_credit(conn, user_id, category)?;
                let active =
                    books::user_book_in_category(conn, user_id, category)?.map(|b| b.book_id);
                Ok(CategoryEligibility {
                    credit,
                    active_book_id: active,
                    can_submit: credit >= 1 && active.is_none(),
                })
            };
            Ok(Eligibility {
                paid: check(Category::Paid)?,
                free: check(Category::Free)?,
            })
        })
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Submit a book: validate, gate on per-category credit, enqueue at the
    /// back, and re-evaluate the advertised window.
    pub fn submit_book(&self, req: SubmitBook) -> Result<BookRow, LedgerError> {
        let price = self.validate(&req)?;

        let input = NewBook {
            user_id: req.user_id,
            title: req.title.clone(),
            link: req.link.clone(),
            price,
            category: req.category,
            admin_exempt: req.admin_exempt,
        };

        let book = self.db.with_conn_mut(|conn| {
            users::upsert_user(conn, req.user_id, req.handle.as_deref())?;

            if !req.admin_exempt {
                if books::user_book_in_category(conn, req.user_id, req.category)?.is_some() {
                    return Err(LedgerError::EligibilityDenied(format!(
                        "User {} already has an active {} book",
                        req.user_id,
                        req.category.as_str()
                    )));
                }
                let credit = db::actions::confirmed_credit(conn, req.user_id, req.category)?;
                if credit < 1 {
                    return Err(LedgerError::EligibilityDenied(format!(
                        "User {} has no confirmed {} actions",
                        req.user_id,
                        req.category.as_str()
                    )));
                }
            }

            books::insert_book(conn, &input, self.cfg.window_size)
        })?;

        self.events.emit(LedgerEvent::BookQueued {
            book_id: book.book_id,
            user_id: book.user_id,
            category: book.category,
            position: book.queue_position,
        });

        Ok(book)
    }

    /// Complete a book's promotion once it reached the required action count.
    /// Returns true when the book was removed. Absent books and books below
    /// the threshold return false.
    pub fn complete_if_ready(&self, book_id: i64) -> Result<bool, LedgerError> {
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

    /// Move a book one position toward the front. Returns false when the
    /// book is absent or already first.
    pub fn promote(&self, book_id: i64, reason: &str) -> Result<bool, LedgerError> {
        let moved = self.db.with_conn_mut(|conn| {
            books::promote_book(
                conn,
                book_id,
                reason,
                self.cfg.refresh_window_on_promote,
                self.cfg.window_size,
            )
        })?;

        if moved {
            self.events.emit(LedgerEvent::BookPromoted {
                book_id,
                reason: reason.to_string(),
            });
        }
        Ok(moved)
    }

    fn validate(&self, req: &SubmitBook) -> Result<f64, LedgerError> {
        let title_len = req.title.chars().count();
        if title_len < TITLE_MIN_CHARS || title_len > TITLE_MAX_CHARS {
            return Err(LedgerError::Validation(format!(
                "Title must be {}-{} characters, got {}",
                TITLE_MIN_CHARS, TITLE_MAX_CHARS, title_len
            )));
        }

        if req.link.trim().is_empty() {
            return Err(LedgerError::Validation("Link must not be empty".to_string()));
        }

        // Free books are always listed at zero
        if req.category == Category::Free {
            return Ok(0.0);
        }

        if !req.price.is_finite() || req.price < self.cfg.min_price {
            return Err(LedgerError::Validation(format!(
                "Price must be at least {}",
                self.cfg.min_price
            )));
        }
        if req.price > self.cfg.max_paid_price {
            return Err(LedgerError::Validation(format!(
                "Price must not exceed {}",
                self.cfg.max_paid_price
            )));
        }
        Ok(req.price)
    }
}
