//! Configuration for the promotion exchange core
//!
//! All tunables of the queue/ledger logic live here; nothing is computed.
//! Values can be loaded from a TOML file or built in code for tests.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::LedgerError;

/// Default database path
pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bookring")
        .join("ledger.db")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Number of front-of-queue books advertised at once (the window)
    #[serde(default = "default_window_size")]
    pub window_size: u32,

    /// Confirmed actions a book needs before its promotion completes
    #[serde(default = "default_actions_required")]
    pub actions_required: u32,

    /// Hours before a pending action is auto-confirmed
    #[serde(default = "default_auto_confirm_hours")]
    pub auto_confirm_hours: u32,

    /// Days an advertised paid book may sit below the completion threshold
    /// before it is evicted
    #[serde(default = "default_book_expiration_days")]
    pub book_expiration_days: u32,

    /// Minimum allowed price for a paid book
    #[serde(default)]
    pub min_price: f64,

    /// Maximum allowed price for a paid book
    #[serde(default = "default_max_paid_price")]
    pub max_paid_price: f64,

    /// Re-evaluate window membership after a promote swap. When false, a swap
    /// that crosses the window boundary leaves statuses stale until the next
    /// enqueue or completion.
    #[serde(default = "default_true")]
    pub refresh_window_on_promote: bool,

    /// Sweeper: auto-confirm cycle interval in seconds
    #[serde(default = "default_auto_confirm_interval")]
    pub auto_confirm_interval_secs: u64,

    /// Sweeper: completion-check cycle interval in seconds
    #[serde(default = "default_completion_interval")]
    pub completion_interval_secs: u64,

    /// Sweeper: paid-book expiration cycle interval in seconds
    #[serde(default = "default_expiration_interval")]
    pub expiration_interval_secs: u64,
}

fn default_window_size() -> u32 {
    5
}

fn default_actions_required() -> u32 {
    5
}

fn default_auto_confirm_hours() -> u32 {
    12
}

fn default_book_expiration_days() -> u32 {
    30
}

fn default_max_paid_price() -> f64 {
    200.0
}

fn default_true() -> bool {
    true
}

fn default_auto_confirm_interval() -> u64 {
    30 * 60
}

fn default_completion_interval() -> u64 {
    15 * 60
}

fn default_expiration_interval() -> u64 {
    6 * 60 * 60
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            window_size: default_window_size(),
            actions_required: default_actions_required(),
            auto_confirm_hours: default_auto_confirm_hours(),
            book_expiration_days: default_book_expiration_days(),
            min_price: 0.0,
            max_paid_price: default_max_paid_price(),
            refresh_window_on_promote: true,
            auto_confirm_interval_secs: default_auto_confirm_interval(),
            completion_interval_secs: default_completion_interval(),
            expiration_interval_secs: default_expiration_interval(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| LedgerError::Config(format!("Parse failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = Config::default();
        assert_eq!(cfg.window_size, 5);
        assert_eq!(cfg.actions_required, 5);
        assert_eq!(cfg.auto_confirm_hours, 12);
        assert_eq!(cfg.book_expiration_days, 30);
        assert!(cfg.refresh_window_on_promote);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: Config = toml::from_str("window_size = 3\nmax_paid_price = 99.0\n").unwrap();
        assert_eq!(cfg.window_size, 3);
        assert_eq!(cfg.max_paid_price, 99.0);
        assert_eq!(cfg.actions_required, 5);
    }
}
