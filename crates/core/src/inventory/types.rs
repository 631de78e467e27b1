//! Stock movement domain types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tally_shared::types::{AccountId, MovementId, ProductId, TenantId, WarehouseId};

use crate::events::{DocumentRef, ReferenceKind, TransferDirection};

use super::error::InventoryError;

/// Whether the product is a plain product or a variant of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    /// Plain product.
    Single,
    /// Product variant.
    Variant,
}

impl ProductType {
    /// Returns the stable storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Variant => "variant",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProductType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(Self::Single),
            "variant" => Ok(Self::Variant),
            other => Err(format!("Unknown product type: {other}")),
        }
    }
}

/// The unit of FIFO costing: one product (or variant) batch in one warehouse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Warehouse holding the stock.
    pub warehouse_id: WarehouseId,
    /// Product or variant id.
    pub product_id: ProductId,
    /// Product or variant.
    pub product_type: ProductType,
    /// Batch number; empty when the product is not batch-tracked.
    pub batch: String,
}

impl StockKey {
    /// Name of the advisory lock serializing rebuilds of this key.
    #[must_use]
    pub fn lock_name(&self) -> String {
        format!(
            "inv_rebuild:{}:{}:{}:{}:{}",
            self.tenant_id, self.warehouse_id, self.product_id, self.product_type, self.batch
        )
    }
}

/// How a returned unit is costed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "peg", content = "price", rename_all = "snake_case")]
pub enum CostPeg {
    /// Last incoming unit cost as of the return date.
    LastIncoming,
    /// A fixed reference price.
    Fixed(Decimal),
}

/// What a movement does to the FIFO state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MovementKind {
    /// Incoming stock at a known unit cost (bills, opening stock, transfer in).
    Receipt,
    /// Outgoing stock costed by FIFO (invoices, supplier credits, transfer out).
    Issue,
    /// Incoming stock costed by a peg (credit notes).
    Return {
        /// Pegging rule.
        peg: CostPeg,
    },
    /// Overrides the value of on-hand stock without changing quantity.
    ValueAdjustment {
        /// Total value on hand after the adjustment.
        new_value: Decimal,
    },
}

impl MovementKind {
    /// Returns the stable storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Receipt => "receipt",
            Self::Issue => "issue",
            Self::Return { .. } => "return",
            Self::ValueAdjustment { .. } => "value_adjustment",
        }
    }

    /// Returns true for movements that take stock out.
    #[must_use]
    pub const fn is_outgoing(self) -> bool {
        matches!(self, Self::Issue)
    }

    /// Returns true for movements that add FIFO layers.
    #[must_use]
    pub const fn is_incoming(self) -> bool {
        matches!(self, Self::Receipt | Self::Return { .. })
    }
}

/// A persisted stock movement.
///
/// Identity and quantity columns are immutable. `unit_cost` (for issues,
/// returns and value adjustments), the cumulative/closing columns and
/// `cost_amount` are derived caches that a rebuild re-derives. A transfer
/// receipt's `unit_cost` follows the issue leg it receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    /// Movement ID.
    pub id: MovementId,
    /// Costing key.
    pub key: StockKey,
    /// Per-key monotonically increasing sequence number.
    pub sequence_no: i64,
    /// Stock date.
    pub stock_date: DateTime<Utc>,
    /// Movement kind.
    pub kind: MovementKind,
    /// Signed quantity; negative for outgoing.
    pub quantity: Decimal,
    /// Unit cost (given for receipts, derived otherwise).
    pub unit_cost: Decimal,
    /// Cumulative incoming quantity including this row.
    pub cumulative_incoming_qty: Decimal,
    /// Cumulative outgoing quantity including this row.
    pub cumulative_outgoing_qty: Decimal,
    /// On-hand quantity after this row.
    pub closing_qty: Decimal,
    /// On-hand value after this row.
    pub closing_value: Decimal,
    /// Value this row moved into (or out of) inventory.
    pub cost_amount: Decimal,
    /// Originating document.
    pub reference: DocumentRef,
    /// Originating document line.
    pub reference_detail_id: Option<Uuid>,
    /// Inventory asset account valued by this row.
    pub inventory_account_id: AccountId,
    /// Account receiving the opposite side of the valuation.
    pub counter_account_id: AccountId,
    /// Whether this row reverses another.
    pub is_reversal: bool,
    /// The row this one reverses.
    pub reverses_movement_id: Option<MovementId>,
    /// The row that reversed this one.
    pub reversed_by_movement_id: Option<MovementId>,
}

impl StockMovement {
    /// Active rows participate in costing.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_reversal && self.reversed_by_movement_id.is_none()
    }

    /// Returns true for rows that take stock out.
    #[must_use]
    pub fn is_outgoing(&self) -> bool {
        self.kind.is_outgoing()
    }

    /// Absolute quantity moved.
    #[must_use]
    pub fn magnitude(&self) -> Decimal {
        self.quantity.abs()
    }

    /// Ordering position within the key.
    #[must_use]
    pub fn position(&self) -> (DateTime<Utc>, i64) {
        (self.stock_date, self.sequence_no)
    }

    /// Transfer leg this row belongs to, for transfer orders.
    #[must_use]
    pub fn transfer_direction(&self) -> Option<TransferDirection> {
        transfer_direction(self.reference.kind, self.kind)
    }

    /// Whether this row is the receiving leg of the transfer issue `issue`:
    /// same transfer line and product, another warehouse.
    #[must_use]
    pub fn receives_transfer(&self, issue: &Self) -> bool {
        self.kind == MovementKind::Receipt
            && self.transfer_direction() == Some(TransferDirection::In)
            && issue.transfer_direction() == Some(TransferDirection::Out)
            && self.reference == issue.reference
            && self.reference_detail_id == issue.reference_detail_id
            && self.key.tenant_id == issue.key.tenant_id
            && self.key.product_id == issue.key.product_id
            && self.key.product_type == issue.key.product_type
            && self.key.batch == issue.key.batch
            && self.key.warehouse_id != issue.key.warehouse_id
    }

    /// Builds the row that cancels this one.
    ///
    /// The reversal carries the negated quantity and cost at the original
    /// stock date, so neither row counts once both are stamped.
    #[must_use]
    pub fn reversal(&self, id: MovementId, sequence_no: i64) -> Self {
        Self {
            id,
            sequence_no,
            quantity: -self.quantity,
            cost_amount: -self.cost_amount,
            is_reversal: true,
            reverses_movement_id: Some(self.id),
            reversed_by_movement_id: None,
            ..self.clone()
        }
    }
}

/// Transfer leg implied by a movement: issues leave, receipts arrive.
#[must_use]
pub fn transfer_direction(reference: ReferenceKind, kind: MovementKind) -> Option<TransferDirection> {
    match reference {
        ReferenceKind::TransferOrder if kind.is_outgoing() => Some(TransferDirection::Out),
        ReferenceKind::TransferOrder => Some(TransferDirection::In),
        _ => None,
    }
}

/// A stock movement to be posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    /// Costing key.
    pub key: StockKey,
    /// Stock date.
    pub stock_date: DateTime<Utc>,
    /// Movement kind.
    pub kind: MovementKind,
    /// Unsigned quantity (zero for value adjustments).
    pub quantity: Decimal,
    /// Unit cost for receipts; ignored otherwise.
    pub unit_cost: Decimal,
    /// Originating document.
    pub reference: DocumentRef,
    /// Originating document line.
    pub reference_detail_id: Option<Uuid>,
    /// Inventory asset account.
    pub inventory_account_id: AccountId,
    /// Opposite-side account (COGS, purchase, adjustment, transfer clearing).
    pub counter_account_id: AccountId,
}

impl NewMovement {
    /// Signed quantity as stored.
    #[must_use]
    pub fn signed_quantity(&self) -> Decimal {
        match self.kind {
            MovementKind::Issue => -self.quantity,
            MovementKind::Receipt | MovementKind::Return { .. } => self.quantity,
            MovementKind::ValueAdjustment { .. } => Decimal::ZERO,
        }
    }

    /// Checks the quantity against the movement kind.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` for a non-positive stock quantity, a
    /// value adjustment carrying a quantity, or a negative cost.
    pub fn validate(&self) -> Result<(), InventoryError> {
        let invalid = || InventoryError::InvalidQuantity {
            kind: self.kind.as_str(),
            quantity: self.quantity,
        };
        match self.kind {
            MovementKind::ValueAdjustment { new_value } => {
                if !self.quantity.is_zero() || new_value < Decimal::ZERO {
                    return Err(invalid());
                }
            }
            MovementKind::Return {
                peg: CostPeg::Fixed(price),
            } if price < Decimal::ZERO => return Err(invalid()),
            MovementKind::Receipt | MovementKind::Issue | MovementKind::Return { .. } => {
                if self.quantity <= Decimal::ZERO || self.unit_cost < Decimal::ZERO {
                    return Err(invalid());
                }
            }
        }
        Ok(())
    }
}
