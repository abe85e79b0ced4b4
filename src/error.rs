//! Error types for bookring

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Eligibility denied: {0}")]
    EligibilityDenied(String),

    #[error("Duplicate action: user {user_id} already acted on book {book_id}")]
    DuplicateAction { book_id: i64, user_id: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
