//! Fixtures for inventory unit tests.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use tally_shared::types::{AccountId, MovementId, ProductId, TenantId, WarehouseId};

use crate::events::{DocumentRef, ReferenceKind};

use super::replay::{StoredAllocations, replay};
use super::types::{CostPeg, MovementKind, ProductType, StockKey, StockMovement};

pub const INVENTORY: AccountId = AccountId::from_uuid(Uuid::from_u128(0x100));
pub const COUNTER: AccountId = AccountId::from_uuid(Uuid::from_u128(0x200));

pub fn key() -> StockKey {
    StockKey {
        tenant_id: TenantId::from_uuid(Uuid::from_u128(1)),
        warehouse_id: WarehouseId::from_uuid(Uuid::from_u128(2)),
        product_id: ProductId::from_uuid(Uuid::from_u128(3)),
        product_type: ProductType::Single,
        batch: String::new(),
    }
}

pub fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, n, 0, 0, 0).unwrap()
}

/// Document id derived from the sequence number, so each row has its own.
pub fn doc(kind: ReferenceKind, seq: i64) -> DocumentRef {
    DocumentRef::new(kind, Uuid::from_u128(0x1000 + u128::try_from(seq).unwrap()))
}

fn movement(
    day_no: u32,
    seq: i64,
    kind: MovementKind,
    quantity: Decimal,
    unit_cost: Decimal,
    reference: ReferenceKind,
) -> StockMovement {
    StockMovement {
        id: MovementId::new(),
        key: key(),
        sequence_no: seq,
        stock_date: day(day_no),
        kind,
        quantity,
        unit_cost,
        cumulative_incoming_qty: Decimal::ZERO,
        cumulative_outgoing_qty: Decimal::ZERO,
        closing_qty: Decimal::ZERO,
        closing_value: Decimal::ZERO,
        cost_amount: Decimal::ZERO,
        reference: doc(reference, seq),
        reference_detail_id: None,
        inventory_account_id: INVENTORY,
        counter_account_id: COUNTER,
        is_reversal: false,
        reverses_movement_id: None,
        reversed_by_movement_id: None,
    }
}

pub fn receipt(day_no: u32, seq: i64, qty: Decimal, unit_cost: Decimal) -> StockMovement {
    movement(day_no, seq, MovementKind::Receipt, qty, unit_cost, ReferenceKind::Bill)
}

pub fn issue(day_no: u32, seq: i64, qty: Decimal) -> StockMovement {
    movement(day_no, seq, MovementKind::Issue, -qty, Decimal::ZERO, ReferenceKind::SalesInvoice)
}

pub fn credit_note(day_no: u32, seq: i64, qty: Decimal, peg: CostPeg) -> StockMovement {
    movement(
        day_no,
        seq,
        MovementKind::Return { peg },
        qty,
        Decimal::ZERO,
        ReferenceKind::CreditNote,
    )
}

pub fn value_adjustment(day_no: u32, seq: i64, new_value: Decimal) -> StockMovement {
    movement(
        day_no,
        seq,
        MovementKind::ValueAdjustment { new_value },
        Decimal::ZERO,
        Decimal::ZERO,
        ReferenceKind::InventoryAdjustmentValue,
    )
}

/// Runs a full replay and stores the result, as a first posting would.
pub fn settled(mut rows: Vec<StockMovement>) -> Vec<StockMovement> {
    let outcome = replay(&key(), &rows, None, &StoredAllocations::new()).unwrap();
    for revision in &outcome.revisions {
        if let Some(row) = rows.iter_mut().find(|r| r.id == revision.movement_id) {
            row.apply_revision(revision);
        }
    }
    rows
}

/// Allocations of a settled history, as the valuation table would hold them.
pub fn allocations_of(rows: &[StockMovement]) -> StoredAllocations {
    replay(&key(), rows, None, &StoredAllocations::new())
        .unwrap()
        .revisions
        .into_iter()
        .filter(|r| !r.allocations.is_empty())
        .map(|r| (r.movement_id, r.allocations))
        .collect()
}
