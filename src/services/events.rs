//! Event system for ledger operations
//!
//! Provides an event bus for notifying listeners about queue and action
//! changes. Useful for:
//! - Audit logging
//! - Presentation-layer notifications (owner prompts, queue updates)
//! - Metrics hooks
//!
//! Services emit after their transaction commits; an event never describes
//! uncommitted state.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::db::{ActionKind, Category};

/// Events emitted by the queue engine, action verifier, and sweeper
#[derive(Debug, Clone)]
pub enum LedgerEvent {
    // Queue events
    BookQueued {
        book_id: i64,
        user_id: i64,
        category: Category,
        position: i64,
    },
    BookCompleted {
        book_id: i64,
        user_id: i64,
        category: Category,
    },
    BookExpired {
        book_id: i64,
        user_id: i64,
        category: Category,
    },
    BookPromoted {
        book_id: i64,
        reason: String,
    },

    // Action events
    ActionSubmitted {
        action_id: i64,
        book_id: i64,
        actor_id: i64,
        kind: ActionKind,
    },
    ActionConfirmed {
        action_id: i64,
        book_id: i64,
        actor_id: i64,
        auto: bool,
    },
    ActionRejected {
        action_id: i64,
        book_id: i64,
        actor_id: i64,
    },
    ActionDeleted {
        action_id: i64,
        book_id: i64,
        actor_id: i64,
    },
}

/// Trait for event listeners
pub trait EventListener: Send + Sync {
    /// Handle an event
    fn on_event(&self, event: &LedgerEvent);
}

/// Event bus for broadcasting ledger events
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Create a new event bus with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: LedgerEvent) {
        trace!(event = ?event, "Emitting ledger event");
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Logging event listener for audit trails
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &LedgerEvent) {
        match event {
            LedgerEvent::BookQueued {
                book_id,
                category,
                position,
                ..
            } => {
                debug!(book_id, category = category.as_str(), position, "Book queued");
            }
            LedgerEvent::BookCompleted { book_id, user_id, .. } => {
                debug!(book_id, owner = user_id, "Book completed promotion");
            }
            LedgerEvent::BookExpired { book_id, user_id, .. } => {
                debug!(book_id, owner = user_id, "Book expired");
            }
            LedgerEvent::ActionConfirmed {
                action_id, auto, ..
            } => {
                debug!(action_id, auto, "Action confirmed");
            }
            _ => {
                trace!(event = ?event, "Ledger event");
            }
        }
    }
}

/// Spawn a background task that logs all events
pub fn spawn_logging_listener(event_bus: Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    let mut receiver = event_bus.subscribe();
    let listener = LoggingEventListener;

    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => listener.on_event(&event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!(skipped = n, "Event listener lagged, skipped events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed, stopping listener");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn event_bus_emit_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(LedgerEvent::BookQueued {
            book_id: 1,
            user_id: 42,
            category: Category::Free,
            position: 6,
        });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .expect("timeout")
            .expect("receive error");

        match event {
            LedgerEvent::BookQueued { book_id, position, .. } => {
                assert_eq!(book_id, 1);
                assert_eq!(position, 6);
            }
            _ => panic!("Wrong event type"),
        }
    }

    #[test]
    fn event_bus_no_subscribers() {
        let bus = EventBus::new();
        // Should not panic even with no subscribers
        bus.emit(LedgerEvent::ActionDeleted {
            action_id: 1,
            book_id: 1,
            actor_id: 1,
        });
    }
}
