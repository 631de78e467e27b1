//! Deterministic replay of one stock key.
//!
//! Replay walks the active history of a key in (stock date, sequence) order
//! and re-derives every cached column. Rows before `from` are not re-derived:
//! their cached values seed the FIFO state. Each replayed row's new cost is
//! diffed against its stored cost and the difference is booked against the
//! row's document, so a document touched by many rows is reposted once.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_shared::types::MovementId;

use crate::currency::round_unit_cost;
use crate::valuation::{DeltaTarget, DocumentDeltas};

use super::error::InventoryError;
use super::fifo::{Allocation, FifoQueue, Layer, Shortfall};
use super::peg::pegged_unit_cost;
use super::types::{MovementKind, StockKey, StockMovement};

/// Allocations currently recorded per outgoing movement.
pub type StoredAllocations = HashMap<MovementId, Vec<Allocation>>;

/// Re-derived state of one movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementRevision {
    /// Movement the revision applies to.
    pub movement_id: MovementId,
    /// Unit cost.
    pub unit_cost: Decimal,
    /// Cumulative incoming quantity including the row.
    pub cumulative_incoming_qty: Decimal,
    /// Cumulative outgoing quantity including the row.
    pub cumulative_outgoing_qty: Decimal,
    /// On-hand quantity after the row.
    pub closing_qty: Decimal,
    /// On-hand value after the row.
    pub closing_value: Decimal,
    /// Value moved by the row.
    pub cost_amount: Decimal,
    /// FIFO draws, for outgoing rows.
    pub allocations: Vec<Allocation>,
    /// Whether the draws differ from the stored ones.
    pub allocations_changed: bool,
}

impl MovementRevision {
    fn differs_from(&self, movement: &StockMovement) -> bool {
        self.allocations_changed
            || self.unit_cost != movement.unit_cost
            || self.cumulative_incoming_qty != movement.cumulative_incoming_qty
            || self.cumulative_outgoing_qty != movement.cumulative_outgoing_qty
            || self.closing_qty != movement.closing_qty
            || self.closing_value != movement.closing_value
            || self.cost_amount != movement.cost_amount
    }
}

impl StockMovement {
    /// Overwrites the derived caches with a revision.
    pub fn apply_revision(&mut self, revision: &MovementRevision) {
        self.unit_cost = revision.unit_cost;
        self.cumulative_incoming_qty = revision.cumulative_incoming_qty;
        self.cumulative_outgoing_qty = revision.cumulative_outgoing_qty;
        self.closing_qty = revision.closing_qty;
        self.closing_value = revision.closing_value;
        self.cost_amount = revision.cost_amount;
    }
}

/// Result of a replay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Revisions of rows whose derived state changed.
    pub revisions: Vec<MovementRevision>,
    /// Valuation deltas per document.
    pub deltas: DocumentDeltas,
    /// Number of rows walked inside the window.
    pub replayed: usize,
}

#[derive(Debug, Default)]
struct ReplayState {
    queue: FifoQueue,
    cum_in: Decimal,
    cum_out: Decimal,
    last_incoming: Option<Decimal>,
}

fn shortfall(key: &StockKey) -> impl Fn(Shortfall) -> InventoryError + '_ {
    move |s| InventoryError::insufficient(key, s.qty_missing)
}

/// Rebuilds FIFO state from the cached columns of the rows before the window.
fn seed(key: &StockKey, prefix: &[&StockMovement]) -> Result<ReplayState, InventoryError> {
    let mut state = ReplayState::default();
    let mut dropped = Decimal::ZERO;

    for movement in prefix {
        match movement.kind {
            MovementKind::Receipt => {
                state.queue.push(Layer::with_value(
                    movement.id,
                    movement.magnitude(),
                    movement.cost_amount,
                ));
                state.last_incoming = Some(movement.unit_cost);
            }
            MovementKind::Return { .. } => state.queue.push(Layer::with_value(
                movement.id,
                movement.magnitude(),
                movement.cost_amount,
            )),
            MovementKind::Issue => {}
            MovementKind::ValueAdjustment { new_value } => {
                state
                    .queue
                    .discard(movement.cumulative_outgoing_qty - dropped)
                    .map_err(shortfall(key))?;
                dropped = movement.cumulative_outgoing_qty;
                state.queue.revalue(new_value);
            }
        }
    }

    if let Some(last) = prefix.last() {
        state
            .queue
            .discard(last.cumulative_outgoing_qty - dropped)
            .map_err(shortfall(key))?;
        state.cum_in = last.cumulative_incoming_qty;
        state.cum_out = last.cumulative_outgoing_qty;
    }

    Ok(state)
}

fn same_allocations(a: &[Allocation], b: &[Allocation]) -> bool {
    let sorted = |v: &[Allocation]| {
        let mut v = v.to_vec();
        v.sort_by(|x, y| (x.layer_movement_id, x.qty).cmp(&(y.layer_movement_id, y.qty)));
        v
    };
    a.len() == b.len() && sorted(a) == sorted(b)
}

impl ReplayState {
    fn step(
        &mut self,
        key: &StockKey,
        movement: &StockMovement,
        stored: &StoredAllocations,
    ) -> Result<MovementRevision, InventoryError> {
        let qty = movement.magnitude();

        let (unit_cost, cost_amount, allocations) = match movement.kind {
            MovementKind::Receipt => {
                let layer = Layer::new(movement.id, qty, movement.unit_cost);
                let value = layer.value;
                self.queue.push(layer);
                self.cum_in += qty;
                self.last_incoming = Some(movement.unit_cost);
                (movement.unit_cost, value, Vec::new())
            }
            MovementKind::Return { peg } => {
                let unit_cost = pegged_unit_cost(peg, self.last_incoming, movement.id)?;
                let layer = Layer::new(movement.id, qty, unit_cost);
                let value = layer.value;
                self.queue.push(layer);
                self.cum_in += qty;
                (unit_cost, value, Vec::new())
            }
            MovementKind::Issue => {
                let cogs = self.queue.consume(qty).map_err(shortfall(key))?;
                self.cum_out += qty;
                let unit_cost = if qty.is_zero() {
                    Decimal::ZERO
                } else {
                    round_unit_cost(cogs.total_cost / qty)
                };
                (unit_cost, cogs.total_cost, cogs.allocations)
            }
            MovementKind::ValueAdjustment { new_value } => {
                let delta = self.queue.revalue(new_value);
                let on_hand = self.queue.on_hand_qty();
                let unit_cost = if on_hand.is_zero() {
                    Decimal::ZERO
                } else {
                    round_unit_cost(self.queue.on_hand_value() / on_hand)
                };
                (unit_cost, delta, Vec::new())
            }
        };

        let allocations_changed = movement.is_outgoing()
            && !same_allocations(
                &allocations,
                stored.get(&movement.id).map_or(&[][..], Vec::as_slice),
            );

        Ok(MovementRevision {
            movement_id: movement.id,
            unit_cost,
            cumulative_incoming_qty: self.cum_in,
            cumulative_outgoing_qty: self.cum_out,
            closing_qty: self.queue.on_hand_qty(),
            closing_value: self.queue.on_hand_value(),
            cost_amount,
            allocations,
            allocations_changed,
        })
    }
}

/// Books the change in a row's cost against its document.
///
/// Outgoing rows move value from inventory to the counter account; every
/// other kind moves it the other way.
fn book(deltas: &mut DocumentDeltas, movement: &StockMovement, change: Decimal) {
    if change.is_zero() {
        return;
    }
    let target = DeltaTarget {
        document: movement.reference,
        direction: movement.transfer_direction(),
    };
    let (debit, credit) = if movement.is_outgoing() {
        (movement.counter_account_id, movement.inventory_account_id)
    } else {
        (movement.inventory_account_id, movement.counter_account_id)
    };
    deltas.debit(target, debit, change);
    deltas.credit(target, credit, change);
}

/// Replays the active history of `key` from `from` (the whole history when
/// `None`).
///
/// # Errors
///
/// Returns `MalformedScope` if a row belongs to another key,
/// `InsufficientLayers` if an outgoing row cannot be covered and
/// `NoCostReference` for an unpeggable return.
pub fn replay(
    key: &StockKey,
    history: &[StockMovement],
    from: Option<DateTime<Utc>>,
    stored: &StoredAllocations,
) -> Result<ReplayOutcome, InventoryError> {
    let mut rows: Vec<&StockMovement> = history.iter().filter(|m| m.is_active()).collect();
    if let Some(stray) = rows.iter().find(|m| m.key != *key) {
        return Err(InventoryError::MalformedScope(format!(
            "movement {} belongs to {} not {}",
            stray.id,
            stray.key.lock_name(),
            key.lock_name()
        )));
    }
    rows.sort_by_key(|m| m.position());

    let split = from.map_or(0, |from| rows.partition_point(|m| m.stock_date < from));
    let (prefix, window) = rows.split_at(split);

    let mut state = seed(key, prefix)?;
    let mut outcome = ReplayOutcome {
        replayed: window.len(),
        ..ReplayOutcome::default()
    };

    for movement in window {
        let revision = state.step(key, movement, stored)?;
        book(
            &mut outcome.deltas,
            movement,
            revision.cost_amount - movement.cost_amount,
        );
        if revision.differs_from(movement) {
            outcome.revisions.push(revision);
        }
    }

    outcome.deltas = outcome.deltas.without_zero();

    tracing::debug!(
        key = %key.lock_name(),
        seeded = prefix.len(),
        replayed = outcome.replayed,
        revised = outcome.revisions.len(),
        documents = outcome.deltas.len(),
        "Replayed stock key"
    );

    Ok(outcome)
}
