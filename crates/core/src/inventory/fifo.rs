//! FIFO layer queue.
//!
//! A layer tracks the quantity and the value still on hand from one incoming
//! movement. Partial consumption takes a proportional, rounded share of the
//! layer's value; consuming the last unit takes whatever value is left, so
//! the queue's total value never drifts from the sum of its inputs.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_shared::types::MovementId;

use crate::currency::{round_amount, round_unit_cost};

/// A surviving portion of an incoming movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Incoming movement the layer came from.
    pub movement_id: MovementId,
    /// Quantity still on hand.
    pub qty: Decimal,
    /// Value still on hand.
    pub value: Decimal,
    basis_qty: Decimal,
    basis_value: Decimal,
}

impl Layer {
    /// Creates a layer from a quantity and a unit cost.
    #[must_use]
    pub fn new(movement_id: MovementId, qty: Decimal, unit_cost: Decimal) -> Self {
        Self::with_value(movement_id, qty, round_amount(qty * unit_cost))
    }

    /// Creates a layer from a quantity and its total value.
    #[must_use]
    pub fn with_value(movement_id: MovementId, qty: Decimal, value: Decimal) -> Self {
        Self {
            movement_id,
            qty,
            value,
            basis_qty: qty,
            basis_value: value,
        }
    }

    /// Current unit cost of the layer.
    #[must_use]
    pub fn unit_cost(&self) -> Decimal {
        if self.qty.is_zero() {
            Decimal::ZERO
        } else {
            round_unit_cost(self.value / self.qty)
        }
    }

    /// Removes `qty` units and returns their value.
    ///
    /// The remaining value is always derived from the basis and the total
    /// consumed, so it does not depend on how consumption was split.
    fn take(&mut self, qty: Decimal) -> Decimal {
        let remaining_qty = self.qty - qty;
        let remaining_value = if remaining_qty.is_zero() || self.basis_qty.is_zero() {
            Decimal::ZERO
        } else {
            let consumed = self.basis_qty - remaining_qty;
            self.basis_value - round_amount(self.basis_value * consumed / self.basis_qty)
        };
        let amount = self.value - remaining_value;
        self.qty = remaining_qty;
        self.value = remaining_value;
        amount
    }

    /// Overrides the remaining value and makes it the new basis.
    fn rebase(&mut self, value: Decimal) {
        self.value = value;
        self.basis_qty = self.qty;
        self.basis_value = value;
    }
}

/// Quantity drawn from one layer by an outgoing movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Incoming movement the quantity came from.
    pub layer_movement_id: MovementId,
    /// Quantity drawn.
    pub qty: Decimal,
    /// Unit cost of the draw.
    pub unit_cost: Decimal,
    /// Value drawn.
    pub amount: Decimal,
}

/// Outgoing demand that could not be covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    /// Quantity missing.
    pub qty_missing: Decimal,
}

/// Result of costing one outgoing quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CogsResult {
    /// Per-layer draws, oldest first.
    pub allocations: Vec<Allocation>,
    /// Total cost of goods.
    pub total_cost: Decimal,
}

/// Ordered queue of FIFO layers for one stock key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FifoQueue {
    layers: VecDeque<Layer>,
}

impl FifoQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a queue from layers already in FIFO order.
    #[must_use]
    pub fn from_layers(layers: impl IntoIterator<Item = Layer>) -> Self {
        Self {
            layers: layers.into_iter().filter(|l| l.qty > Decimal::ZERO).collect(),
        }
    }

    /// Appends an incoming layer.
    pub fn push(&mut self, layer: Layer) {
        if layer.qty > Decimal::ZERO {
            self.layers.push_back(layer);
        }
    }

    /// Layers currently on hand, oldest first.
    pub fn layers(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    /// Quantity on hand.
    #[must_use]
    pub fn on_hand_qty(&self) -> Decimal {
        self.layers.iter().map(|l| l.qty).sum()
    }

    /// Value on hand.
    #[must_use]
    pub fn on_hand_value(&self) -> Decimal {
        self.layers.iter().map(|l| l.value).sum()
    }

    /// Consumes `qty` oldest-first.
    ///
    /// On shortfall the queue is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the missing quantity when the layers cannot cover `qty`.
    pub fn consume(&mut self, qty: Decimal) -> Result<CogsResult, Shortfall> {
        let available = self.on_hand_qty();
        if qty > available {
            return Err(Shortfall {
                qty_missing: qty - available,
            });
        }

        let mut remaining = qty;
        let mut allocations = Vec::new();
        let mut total_cost = Decimal::ZERO;

        while remaining > Decimal::ZERO {
            let Some(layer) = self.layers.front_mut() else {
                break;
            };

            let unit_cost = layer.unit_cost();
            let take = layer.qty.min(remaining);
            let amount = layer.take(take);

            allocations.push(Allocation {
                layer_movement_id: layer.movement_id,
                qty: take,
                unit_cost,
                amount,
            });
            total_cost += amount;
            remaining -= take;

            if layer.qty.is_zero() {
                self.layers.pop_front();
            }
        }

        Ok(CogsResult {
            allocations,
            total_cost,
        })
    }

    /// Drops `qty` oldest-first without recording allocations.
    ///
    /// # Errors
    ///
    /// Returns the missing quantity when the layers cannot cover `qty`.
    pub fn discard(&mut self, qty: Decimal) -> Result<(), Shortfall> {
        self.consume(qty).map(|_| ())
    }

    /// Overrides the total on-hand value, spreading it over the layers in
    /// proportion to quantity. Returns the value delta.
    ///
    /// An empty queue cannot be revalued and returns zero.
    pub fn revalue(&mut self, new_value: Decimal) -> Decimal {
        let total_qty = self.on_hand_qty();
        if total_qty.is_zero() {
            return Decimal::ZERO;
        }

        let old_value = self.on_hand_value();
        let mut assigned = Decimal::ZERO;
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let value = if i == last {
                new_value - assigned
            } else {
                round_amount(new_value * layer.qty / total_qty)
            };
            layer.rebase(value);
            assigned += value;
        }

        new_value - old_value
    }
}

/// Costs an outgoing quantity against a list of layers.
///
/// Returns the allocations and the layers left over.
///
/// # Errors
///
/// Returns the missing quantity when the layers cannot cover `qty`.
pub fn calculate_cogs(
    layers: &[Layer],
    qty: Decimal,
) -> Result<(CogsResult, Vec<Layer>), Shortfall> {
    let mut queue = FifoQueue::from_layers(layers.iter().cloned());
    let result = queue.consume(qty)?;
    Ok((result, queue.layers.into_iter().collect()))
}
