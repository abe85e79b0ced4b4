//! bookring - queue and credit-ledger core for a mutual book promotion
//! exchange
//!
//! Authors submit a book into a per-category (paid/free) FIFO queue, the
//! front `K` books are advertised, and readers earn promotion credit by
//! performing verified actions (purchase, rating, review, subscription) on
//! other authors' books. Credit gates the right to submit; enough confirmed
//! actions complete a book's promotion and retire it from the queue.
//!
//! ## Architecture
//!
//! - **db** - SQLite ledger store; exclusively owns users, books, actions,
//!   and the position audit trail. Every read-modify-write runs in one
//!   transaction.
//! - **services** - queue engine (positions, advertised window, eligibility),
//!   action verifier (pending -> confirmed/rejected/auto_confirmed plus
//!   counter side effects), and the expiry sweeper (time-driven cycles).
//!
//! The chat/presentation layer is an external collaborator: it calls these
//! services and renders results, but holds no state of its own.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use bookring::{Config, LedgerDb, EventBus, QueueService, SubmitBook, Category};
//!
//! # fn run() -> Result<(), bookring::LedgerError> {
//! let cfg = Config::default();
//! let db = Arc::new(LedgerDb::open(&cfg.db_path)?);
//! let events = Arc::new(EventBus::new());
//! let queue = QueueService::new(db, events, cfg);
//!
//! let book = queue.submit_book(SubmitBook {
//!     user_id: 42,
//!     handle: Some("author".to_string()),
//!     title: "My Novel".to_string(),
//!     link: "https://example.com/my-novel".to_string(),
//!     price: 0.0,
//!     category: Category::Free,
//!     admin_exempt: true,
//! })?;
//! assert_eq!(book.queue_position, 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod services;

// Re-exports
pub use config::Config;
pub use db::{
    ActionKind, ActionRow, ActionStatus, BookRow, BookStatus, Category, HistoryRow, LedgerDb,
    LedgerStats, NewBook, UserRow,
};
pub use error::LedgerError;
pub use services::{
    ActionService, CategoryEligibility, Eligibility, EventBus, LedgerEvent, QueueService,
    ResolveOutcome, SubmitBook, Sweeper,
};
