//! Append-only FIFO allocation rows.
//!
//! Each outgoing movement owns the rows describing which layers it drew
//! from. When a rebuild changes those draws the old rows are not edited:
//! they are cancelled by negated reversal rows and the new draws are
//! appended.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_shared::types::{MovementId, StockValuationId, TenantId};

use crate::events::DocumentRef;

use super::fifo::Allocation;
use super::replay::{MovementRevision, StoredAllocations};

/// A persisted allocation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockValuation {
    /// Row ID.
    pub id: StockValuationId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Outgoing movement that drew the quantity.
    pub movement_id: MovementId,
    /// Incoming movement whose layer was drawn.
    pub layer_movement_id: MovementId,
    /// Quantity drawn; negated on reversal rows.
    pub qty: Decimal,
    /// Unit cost of the draw.
    pub unit_cost: Decimal,
    /// Value drawn; negated on reversal rows.
    pub amount: Decimal,
    /// Document of the outgoing movement.
    pub reference: DocumentRef,
    /// Whether this row cancels another.
    pub is_reversal: bool,
    /// The row this one cancels.
    pub reverses_valuation_id: Option<StockValuationId>,
    /// The row that cancelled this one.
    pub reversed_by_valuation_id: Option<StockValuationId>,
    /// Insert time.
    pub created_at: DateTime<Utc>,
}

impl StockValuation {
    /// Active rows describe current draws.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_reversal && self.reversed_by_valuation_id.is_none()
    }

    /// The draw this row records.
    #[must_use]
    pub fn allocation(&self) -> Allocation {
        Allocation {
            layer_movement_id: self.layer_movement_id,
            qty: self.qty,
            unit_cost: self.unit_cost,
            amount: self.amount,
        }
    }
}

/// An allocation row to insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewValuation {
    /// Outgoing movement.
    pub movement_id: MovementId,
    /// Layer drawn.
    pub layer_movement_id: MovementId,
    /// Quantity.
    pub qty: Decimal,
    /// Unit cost.
    pub unit_cost: Decimal,
    /// Value.
    pub amount: Decimal,
    /// Document of the outgoing movement.
    pub reference: DocumentRef,
    /// Row cancelled by this one, for reversal rows.
    pub reverses: Option<StockValuationId>,
}

impl NewValuation {
    fn draw(movement_id: MovementId, reference: DocumentRef, allocation: &Allocation) -> Self {
        Self {
            movement_id,
            layer_movement_id: allocation.layer_movement_id,
            qty: allocation.qty,
            unit_cost: allocation.unit_cost,
            amount: allocation.amount,
            reference,
            reverses: None,
        }
    }

    fn cancelling(row: &StockValuation) -> Self {
        Self {
            movement_id: row.movement_id,
            layer_movement_id: row.layer_movement_id,
            qty: -row.qty,
            unit_cost: row.unit_cost,
            amount: -row.amount,
            reference: row.reference,
            reverses: Some(row.id),
        }
    }

    /// Whether this row cancels an existing one.
    #[must_use]
    pub const fn is_reversal(&self) -> bool {
        self.reverses.is_some()
    }
}

/// Groups the active rows of each movement as allocations.
#[must_use]
pub fn stored_allocations(rows: &[StockValuation]) -> StoredAllocations {
    let mut stored = StoredAllocations::new();
    for row in rows.iter().filter(|r| r.is_active()) {
        stored.entry(row.movement_id).or_default().push(row.allocation());
    }
    stored
}

/// Rows to append for a set of revisions.
///
/// For every revision whose draws changed, the movement's active rows are
/// cancelled and its new draws appended. `documents` maps each movement to
/// its document reference.
#[must_use]
pub fn plan_valuation_rows(
    revisions: &[MovementRevision],
    active: &[StockValuation],
    documents: &HashMap<MovementId, DocumentRef>,
) -> Vec<NewValuation> {
    let mut rows = Vec::new();
    for revision in revisions.iter().filter(|r| r.allocations_changed) {
        let Some(reference) = documents.get(&revision.movement_id).copied() else {
            continue;
        };
        rows.extend(
            active
                .iter()
                .filter(|v| v.is_active() && v.movement_id == revision.movement_id)
                .map(NewValuation::cancelling),
        );
        rows.extend(
            revision
                .allocations
                .iter()
                .map(|a| NewValuation::draw(revision.movement_id, reference, a)),
        );
    }
    rows
}

/// Rows cancelling every active draw of the given movements, for movements
/// that are being reversed.
#[must_use]
pub fn cancel_valuation_rows(
    active: &[StockValuation],
    movements: &HashSet<MovementId>,
) -> Vec<NewValuation> {
    active
        .iter()
        .filter(|v| v.is_active() && movements.contains(&v.movement_id))
        .map(NewValuation::cancelling)
        .collect()
}
