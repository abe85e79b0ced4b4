//! Business logic services over the ledger store

pub mod action_service;
pub mod events;
pub mod queue_service;
pub mod sweeper;

pub use action_service::{ActionService, ResolveOutcome};
pub use events::{spawn_logging_listener, EventBus, EventListener, LedgerEvent, LoggingEventListener};
pub use queue_service::{CategoryEligibility, Eligibility, QueueService, SubmitBook};
pub use sweeper::Sweeper;
