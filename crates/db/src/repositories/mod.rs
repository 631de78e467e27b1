//! Repositories over the ledger, stock, idempotency, and outbox tables.
//!
//! Write paths take the caller's `DatabaseTransaction` so a whole posting
//! commits or rolls back as one unit. Read paths accept any connection.

pub mod idempotency;
pub mod inventory;
pub mod journal;
pub mod outbox;
pub mod reconciliation;
pub mod repost;

pub use idempotency::IdempotencyRepository;
pub use inventory::{InventoryRepository, earliest_active_date, load_history};
pub use journal::JournalRepository;
pub use outbox::{ClaimedBatch, OutboxRepository};
pub use reconciliation::{ReconciliationError, ReconciliationRepository};
pub use repost::{RepostRepository, Reposted};
