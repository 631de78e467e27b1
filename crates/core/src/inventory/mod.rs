//! FIFO inventory valuation.
//!
//! - Stock movement and key types
//! - FIFO layer queue and cost of goods
//! - Backdated-recompute detection
//! - Deterministic replay producing cache revisions and document deltas
//! - Credit-note pegging
//! - Non-negative stock guard
//! - Append-only allocation rows

pub mod error;
pub mod fifo;
pub mod guard;
pub mod peg;
pub mod recompute;
pub mod replay;
pub mod types;
pub mod valuation_rows;

#[cfg(test)]
mod fifo_props;
#[cfg(test)]
pub(crate) mod testing;
#[cfg(test)]
mod tests;

pub use error::InventoryError;
pub use fifo::{Allocation, CogsResult, FifoQueue, Layer, Shortfall, calculate_cogs};
pub use guard::check_non_negative;
pub use peg::pegged_unit_cost;
pub use recompute::{RecomputeReason, needs_recompute};
pub use replay::{MovementRevision, ReplayOutcome, StoredAllocations, replay};
pub use types::{
    CostPeg, MovementKind, NewMovement, ProductType, StockKey, StockMovement, transfer_direction,
};
pub use valuation_rows::{
    NewValuation, StockValuation, cancel_valuation_rows, plan_valuation_rows, stored_allocations,
};
