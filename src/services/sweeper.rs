//! Expiry sweeper - time-driven maintenance cycles
//!
//! Three independent jobs: auto-confirm aged pending actions, retire books
//! that reached their confirmation threshold, and evict advertised paid
//! books that ran out their time budget. Each cycle is callable run-once by
//! an external scheduler; `spawn` starts interval loops as a convenience.
//! A failed cycle is logged and never aborts later runs; within the
//! expiration cycle each book is removed in its own transaction, so a
//! mid-cycle failure leaves the store consistent book by book.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::{books, Category, LedgerDb};
use crate::error::LedgerError;

use super::action_service::ActionService;
use super::events::{EventBus, LedgerEvent};
use super::queue_service::QueueService;

/// Expiry sweeper over the shared ledger
#[derive(Clone)]
pub struct Sweeper {
    db: Arc<LedgerDb>,
    events: Arc<EventBus>,
    actions: ActionService,
    queue: QueueService,
    cfg: Config,
}

impl Sweeper {
    /// Create a new sweeper
    pub fn new(db: Arc<LedgerDb>, events: Arc<EventBus>, cfg: Config) -> Self {
        Self {
            actions: ActionService::new(db.clone(), events.clone(), cfg.clone()),
            queue: QueueService::new(db.clone(), events.clone(), cfg.clone()),
            db,
            events,
            cfg,
        }
    }

    /// Auto-confirm pending actions older than the configured threshold.
    /// Returns how many actions were confirmed.
    pub fn auto_confirm_cycle(&self) -> Result<usize, LedgerError> {
        self.actions.auto_confirm_stale(self.cfg.auto_confirm_hours)
    }

    /// Retire advertised books that reached the required action count.
    /// Returns how many books completed.
    pub fn completion_cycle(&self) -> Result<usize, LedgerError> {
        let mut completed = 0;
        for category in Category::ALL {
            for book in self.queue.advertised(category)? {
                if self.queue.complete_if_ready(book.book_id)? {
                    completed += 1;
                }
            }
        }
        if completed > 0 {
            debug!(completed, "Completion cycle retired books");
        }
        Ok(completed)
    }

    /// Evict advertised paid books that stayed below the completion
    /// threshold past the expiration window. Free books never expire.
    /// Each eviction is its own transaction; failures are logged and the
    /// cycle moves on. Returns how many books were removed.
    pub fn expiration_cycle(&self) -> Result<usize, LedgerError> {
        let cutoff = (Utc::now() - Duration::days(self.cfg.book_expiration_days as i64))
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        let candidates = self.db.with_conn(|conn| {
            books::expired_paid(conn, self.cfg.actions_required, &cutoff)
        })?;

        let mut removed = 0;
        for book in candidates {
            let result = self.db.with_conn_mut(|conn| {
                books::remove_book(conn, book.book_id, true, self.cfg.window_size)
            });

            match result {
                Ok(true) => {
                    removed += 1;
                    info!(
                        book_id = book.book_id,
                        title = %book.title,
                        confirmed = book.confirmed_actions,
                        "Expired stale paid book"
                    );
                    self.events.emit(LedgerEvent::BookExpired {
                        book_id: book.book_id,
                        user_id: book.user_id,
                        category: book.category,
                    });
                }
                // Already gone: completed or expired by a concurrent cycle
                Ok(false) => {}
                Err(e) => {
                    warn!(book_id = book.book_id, error = %e, "Failed to expire book, continuing");
                }
            }
        }

        Ok(removed)
    }

    /// Spawn the three cycles as independent interval loops. Errors within a
    /// tick are logged; the loops never stop on their own.
    pub fn spawn(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = vec![];

        let sweeper = self.clone();
        let every = self.cfg.auto_confirm_interval_secs;
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(every));
            loop {
                interval.tick().await;
                match sweeper.auto_confirm_cycle() {
                    Ok(n) => debug!(confirmed = n, "Auto-confirm cycle finished"),
                    Err(e) => warn!(error = %e, "Auto-confirm cycle failed"),
                }
            }
        }));

        let sweeper = self.clone();
        let every = self.cfg.completion_interval_secs;
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(every));
            loop {
                interval.tick().await;
                match sweeper.completion_cycle() {
                    Ok(n) => debug!(completed = n, "Completion cycle finished"),
                    Err(e) => warn!(error = %e, "Completion cycle failed"),
                }
            }
        }));

        let sweeper = self.clone();
        let every = self.cfg.expiration_interval_secs;
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(every));
            loop {
                interval.tick().await;
                match sweeper.expiration_cycle() {
                    Ok(n) => debug!(removed = n, "Expiration cycle finished"),
                    Err(e) => warn!(error = %e, "Expiration cycle failed"),
                }
            }
        }));

        handles
    }
}
