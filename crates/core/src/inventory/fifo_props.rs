//! Property-based tests for FIFO costing and replay.

use chrono::Duration;
use proptest::prelude::*;
use rust_decimal::Decimal;

use super::fifo::{FifoQueue, Layer};
use super::replay::{StoredAllocations, replay};
use super::testing::{allocations_of, day, issue, key, receipt, settled};
use super::types::StockMovement;
use tally_shared::types::MovementId;

/// (is_receipt, qty, unit cost in cents)
fn arb_ops() -> impl Strategy<Value = Vec<(bool, i64, i64)>> {
    prop::collection::vec((any::<bool>(), 1i64..50, 1i64..10_000), 1..30)
}

/// Builds a history that never goes negative: issues are clamped to stock on hand.
fn history(ops: &[(bool, i64, i64)]) -> Vec<StockMovement> {
    let mut on_hand = 0i64;
    let mut rows = Vec::new();
    for (i, (is_receipt, qty, cents)) in ops.iter().enumerate() {
        let seq = i64::try_from(i).unwrap() + 1;
        let mut row = if *is_receipt || on_hand == 0 {
            on_hand += qty;
            receipt(1, seq, Decimal::from(*qty), Decimal::new(*cents, 2))
        } else {
            let take = (*qty).min(on_hand);
            on_hand -= take;
            issue(1, seq, Decimal::from(take))
        };
        row.stock_date = day(1) + Duration::days(seq);
        rows.push(row);
    }
    rows
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Value is conserved: everything received is either issued or on hand.
    #[test]
    fn prop_value_is_conserved(ops in arb_ops()) {
        let rows = settled(history(&ops));
        let received: Decimal = rows.iter().filter(|m| !m.is_outgoing()).map(|m| m.cost_amount).sum();
        let issued: Decimal = rows.iter().filter(|m| m.is_outgoing()).map(|m| m.cost_amount).sum();
        let last = rows.iter().max_by_key(|m| m.position()).unwrap();

        prop_assert_eq!(received, issued + last.closing_value);
        prop_assert!(last.closing_qty >= Decimal::ZERO);
    }

    /// Replaying from any point of a settled history reproduces it exactly.
    #[test]
    fn prop_seeded_replay_is_noop(ops in arb_ops(), split in 0usize..30) {
        let rows = settled(history(&ops));
        let stored = allocations_of(&rows);
        let from = rows[split % rows.len()].stock_date;

        let outcome = replay(&key(), &rows, Some(from), &stored).unwrap();
        prop_assert!(outcome.revisions.is_empty());
        prop_assert!(outcome.deltas.is_empty());
    }

    /// Consuming in two draws costs the same as one draw of the sum.
    #[test]
    fn prop_split_draws_cost_the_same(
        layers in prop::collection::vec((1i64..50, 1i64..10_000), 1..8),
        a in 1i64..100,
        b in 1i64..100,
    ) {
        let layers: Vec<Layer> = layers
            .into_iter()
            .map(|(q, c)| Layer::new(MovementId::new(), Decimal::from(q), Decimal::new(c, 2)))
            .collect();
        let mut once = FifoQueue::from_layers(layers.clone());
        let mut twice = FifoQueue::from_layers(layers);
        let total = once.on_hand_qty();
        let a = Decimal::from(a).min(total);
        let b = Decimal::from(b).min(total - a);

        let single = once.consume(a + b).unwrap().total_cost;
        let split = twice.consume(a).unwrap().total_cost + twice.consume(b).unwrap().total_cost;

        prop_assert_eq!(once.on_hand_value() + single, twice.on_hand_value() + split);
        prop_assert_eq!(once.on_hand_qty(), twice.on_hand_qty());
    }

    /// A request above supply fails without consuming anything.
    #[test]
    fn prop_over_demand_is_rejected(qty in 1i64..50, extra in 1i64..10) {
        let mut queue = FifoQueue::new();
        queue.push(Layer::new(MovementId::new(), Decimal::from(qty), Decimal::ONE));
        let err = queue.consume(Decimal::from(qty + extra)).unwrap_err();
        prop_assert_eq!(err.qty_missing, Decimal::from(extra));
        prop_assert_eq!(queue.on_hand_qty(), Decimal::from(qty));
    }
}

#[test]
fn test_empty_history_replays_to_nothing() {
    let outcome = replay(&key(), &[], None, &StoredAllocations::new()).unwrap();
    assert_eq!(outcome.replayed, 0);
}
