//! Scenario tests for replay and backdated recompute.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::events::{ReferenceKind, TransferDirection};
use crate::valuation::DeltaTarget;

use super::error::InventoryError;
use super::recompute::needs_recompute;
use super::replay::{StoredAllocations, replay};
use super::testing::{
    COUNTER, INVENTORY, allocations_of, credit_note, day, doc, issue, key, receipt, settled,
    value_adjustment,
};
use super::types::{CostPeg, StockMovement};

fn with(mut rows: Vec<StockMovement>, extra: StockMovement) -> Vec<StockMovement> {
    rows.push(extra);
    rows
}

#[test]
fn test_first_posting_costs_issue_fifo() {
    let rows = vec![
        receipt(1, 1, dec!(10), dec!(2.00)),
        receipt(2, 2, dec!(5), dec!(3.00)),
        issue(3, 3, dec!(12)),
    ];
    let outcome = replay(&key(), &rows, None, &StoredAllocations::new()).unwrap();

    let issued = outcome
        .revisions
        .iter()
        .find(|r| r.movement_id == rows[2].id)
        .unwrap();
    assert_eq!(issued.cost_amount, dec!(26.00));
    assert_eq!(issued.closing_qty, dec!(3));
    assert_eq!(issued.closing_value, dec!(9.00));
    assert_eq!(issued.cumulative_outgoing_qty, dec!(12));
    assert_eq!(issued.cumulative_incoming_qty, dec!(15));

    let invoice = DeltaTarget {
        document: doc(ReferenceKind::SalesInvoice, 3),
        direction: None,
    };
    let deltas = outcome.deltas.get(&invoice).unwrap();
    assert_eq!(deltas[&COUNTER].debit_delta, dec!(26.00));
    assert_eq!(deltas[&INVENTORY].credit_delta, dec!(26.00));
}

#[test]
fn test_backdated_receipt_reprices_later_issue_once() {
    let history = settled(vec![
        receipt(1, 1, dec!(10), dec!(2)),
        receipt(4, 2, dec!(5), dec!(3)),
        issue(5, 3, dec!(12)),
    ]);
    let stored = allocations_of(&history);
    let backdated = receipt(2, 4, dec!(5), dec!(1));
    assert!(needs_recompute(&history, backdated.stock_date, backdated.sequence_no).is_some());

    let rows = with(history.clone(), backdated);
    let outcome = replay(&key(), &rows, Some(day(2)), &stored).unwrap();

    let issued = outcome
        .revisions
        .iter()
        .find(|r| r.movement_id == history[2].id)
        .unwrap();
    // 10 @ 2 + 2 @ 1
    assert_eq!(issued.cost_amount, dec!(22));
    assert!(issued.allocations_changed);

    // the invoice and the new bill; the day 4 bill is unchanged in cost
    assert_eq!(outcome.deltas.len(), 2);
    let invoice = DeltaTarget {
        document: doc(ReferenceKind::SalesInvoice, 3),
        direction: None,
    };
    let deltas = outcome.deltas.get(&invoice).unwrap();
    assert_eq!(deltas[&COUNTER].net(), dec!(-4));
    assert_eq!(deltas[&INVENTORY].net(), dec!(4));
    assert!(
        outcome
            .deltas
            .get(&DeltaTarget {
                document: doc(ReferenceKind::Bill, 2),
                direction: None,
            })
            .is_none()
    );
}

#[test]
fn test_seeded_replay_matches_full_replay() {
    let history = settled(vec![
        receipt(1, 1, dec!(10), dec!(2)),
        issue(2, 2, dec!(4)),
        receipt(3, 3, dec!(6), dec!(5)),
        issue(6, 4, dec!(8)),
    ]);
    let stored = allocations_of(&history);
    let rows = with(history, receipt(4, 5, dec!(3), dec!(1)));

    let seeded = replay(&key(), &rows, Some(day(4)), &stored).unwrap();
    let full = replay(&key(), &rows, None, &stored).unwrap();

    assert_eq!(seeded.revisions, full.revisions);
    assert_eq!(seeded.deltas, full.deltas);
    assert_eq!(seeded.replayed, 2);
    assert_eq!(full.replayed, 5);
}

#[test]
fn test_outgoing_above_supply_is_scoped_shortfall() {
    let rows = vec![
        receipt(1, 1, dec!(10), dec!(2)),
        receipt(2, 2, dec!(5), dec!(3)),
        issue(3, 3, dec!(16)),
    ];
    let err = replay(&key(), &rows, None, &StoredAllocations::new()).unwrap_err();

    match &err {
        InventoryError::InsufficientLayers {
            product_id,
            warehouse_id,
            qty_missing,
            ..
        } => {
            assert_eq!(*qty_missing, dec!(1));
            assert_eq!(*product_id, key().product_id);
            assert_eq!(*warehouse_id, key().warehouse_id);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.shortfall_scope(key().tenant_id), Some(key()));
}

#[test]
fn test_backdated_receipt_repegs_credit_note() {
    let history = settled(vec![
        receipt(1, 1, dec!(10), dec!(2)),
        credit_note(5, 2, dec!(1), CostPeg::LastIncoming),
    ]);
    assert_eq!(history[1].unit_cost, dec!(2));

    let rows = with(history.clone(), receipt(3, 3, dec!(5), dec!(4)));
    let outcome = replay(&key(), &rows, Some(day(3)), &allocations_of(&history)).unwrap();

    let repegged = outcome
        .revisions
        .iter()
        .find(|r| r.movement_id == history[1].id)
        .unwrap();
    assert_eq!(repegged.unit_cost, dec!(4));

    let note = DeltaTarget {
        document: doc(ReferenceKind::CreditNote, 2),
        direction: None,
    };
    let deltas = outcome.deltas.get(&note).unwrap();
    assert_eq!(deltas[&INVENTORY].debit_delta, dec!(2));
    assert_eq!(deltas[&COUNTER].credit_delta, dec!(2));
}

#[test]
fn test_fixed_peg_survives_rebuild() {
    let history = settled(vec![
        receipt(1, 1, dec!(10), dec!(2)),
        credit_note(5, 2, dec!(1), CostPeg::Fixed(dec!(1.5))),
    ]);
    let rows = with(history.clone(), receipt(3, 3, dec!(5), dec!(4)));
    let outcome = replay(&key(), &rows, Some(day(3)), &allocations_of(&history)).unwrap();
    assert!(
        outcome
            .revisions
            .iter()
            .filter(|r| r.movement_id == history[1].id)
            .all(|r| r.unit_cost == dec!(1.5))
    );
}

#[test]
fn test_value_adjustment_delta_follows_window() {
    let history = settled(vec![
        receipt(1, 1, dec!(10), dec!(2)),
        value_adjustment(3, 2, dec!(30)),
        issue(5, 3, dec!(5)),
    ]);
    assert_eq!(history[1].cost_amount, dec!(10));
    assert_eq!(history[2].cost_amount, dec!(15));

    let rows = with(history.clone(), receipt(2, 4, dec!(10), dec!(1)));
    let outcome = replay(&key(), &rows, Some(day(2)), &allocations_of(&history)).unwrap();

    let adjustment = DeltaTarget {
        document: doc(ReferenceKind::InventoryAdjustmentValue, 2),
        direction: None,
    };
    // on hand was already worth 30 when the adjustment ran
    assert_eq!(outcome.deltas.get(&adjustment).unwrap()[&INVENTORY].net(), dec!(-10));

    let invoice = DeltaTarget {
        document: doc(ReferenceKind::SalesInvoice, 3),
        direction: None,
    };
    assert_eq!(outcome.deltas.get(&invoice).unwrap()[&COUNTER].net(), dec!(-7.5));
}

#[test]
fn test_rebuild_of_settled_history_is_noop() {
    let history = settled(vec![
        receipt(1, 1, dec!(10), dec!(2)),
        issue(2, 2, dec!(3)),
        credit_note(3, 3, dec!(1), CostPeg::LastIncoming),
        value_adjustment(4, 4, dec!(20)),
    ]);
    let outcome = replay(&key(), &history, Some(day(2)), &allocations_of(&history)).unwrap();
    assert!(outcome.revisions.is_empty());
    assert!(outcome.deltas.is_empty());
}

#[test]
fn test_transfer_legs_book_separate_targets() {
    let mut out = issue(2, 2, dec!(4));
    out.reference = doc(ReferenceKind::TransferOrder, 99);
    let rows = vec![receipt(1, 1, dec!(10), dec!(2)), out];

    let outcome = replay(&key(), &rows, None, &StoredAllocations::new()).unwrap();
    let target = DeltaTarget {
        document: doc(ReferenceKind::TransferOrder, 99),
        direction: Some(TransferDirection::Out),
    };
    assert_eq!(outcome.deltas.get(&target).unwrap()[&INVENTORY].credit_delta, dec!(8));
}

#[test]
fn test_reversed_rows_do_not_count() {
    let mut history = settled(vec![receipt(1, 1, dec!(10), dec!(2)), issue(2, 2, dec!(4))]);
    history[1].reversed_by_movement_id = Some(tally_shared::types::MovementId::new());
    let rows = with(history, issue(3, 3, dec!(10)));
    let outcome = replay(&key(), &rows, Some(day(3)), &StoredAllocations::new()).unwrap();
    assert_eq!(outcome.revisions[0].cost_amount, dec!(20));
    assert_eq!(outcome.revisions[0].closing_qty, Decimal::ZERO);
}

#[test]
fn test_foreign_key_row_is_malformed_scope() {
    let mut stray = receipt(1, 1, dec!(1), dec!(1));
    stray.key.batch = "OTHER".to_string();
    let err = replay(&key(), &[stray], None, &StoredAllocations::new()).unwrap_err();
    assert!(matches!(err, InventoryError::MalformedScope(_)));
}
