//! Core ledger and inventory valuation logic for Tally.
//!
//! This crate contains pure business logic with ZERO database dependencies.
//! All domain types, costing rules, and state machines live here; the `db`
//! crate drives them inside relational transactions.
//!
//! # Modules
//!
//! - `ledger` - Journals, ledger lines, reversal protocol, balance upkeep
//! - `currency` - Exchange conversion and base/foreign amount resolution
//! - `events` - Change-event envelope and reference kinds
//! - `inventory` - FIFO costing, recompute detection, deterministic replay
//! - `valuation` - Per-document valuation deltas and journal reposting
//! - `idempotency` - De-duplication key state machine
//! - `lock` - Advisory lock capability
//! - `outbox` - Dispatcher retry policy and publisher seam
//! - `posting` - Translator seam between business documents and the core
//! - `reconcile` - Ledger/inventory mismatch detection

pub mod currency;
pub mod events;
pub mod idempotency;
pub mod inventory;
pub mod ledger;
pub mod lock;
pub mod outbox;
pub mod posting;
pub mod reconcile;
pub mod valuation;
