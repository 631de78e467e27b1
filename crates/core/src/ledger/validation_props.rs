//! Property-based tests for journal line validation.

use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::types::AccountId;

use super::error::LedgerError;
use super::types::NewLine;
use super::validation::validate_lines;

/// Amounts from 0.01 to 1,000,000.00.
fn positive_amount() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// Debit lines for `amounts` plus credit lines splitting the same total.
fn balanced_lines(amounts: &[Decimal], splits: usize) -> Vec<NewLine> {
    let total: Decimal = amounts.iter().sum();
    let mut lines: Vec<NewLine> = amounts
        .iter()
        .map(|a| NewLine::debit(AccountId::new(), *a))
        .collect();

    let parts = Decimal::from(splits);
    let share = (total / parts).round_dp(2);
    let mut remaining = total;
    for _ in 1..splits {
        lines.push(NewLine::credit(AccountId::new(), share));
        remaining -= share;
    }
    lines.push(NewLine::credit(AccountId::new(), remaining));
    lines
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_balanced_lines_pass(
        amounts in prop::collection::vec(positive_amount(), 1..8),
        splits in 1usize..4,
    ) {
        let lines = balanced_lines(&amounts, splits);
        prop_assume!(lines.iter().all(|l| l.base_credit >= Decimal::ZERO));

        let totals = validate_lines(&lines).unwrap();
        let expected: Decimal = amounts.iter().sum();
        prop_assert_eq!(totals.debit, expected);
        prop_assert_eq!(totals.credit, expected);
    }

    #[test]
    fn prop_any_imbalance_is_rejected(
        amounts in prop::collection::vec(positive_amount(), 1..8),
        skew in positive_amount(),
    ) {
        let mut lines = balanced_lines(&amounts, 1);
        lines.push(NewLine::debit(AccountId::new(), skew));

        let result = validate_lines(&lines);
        let is_unbalanced = matches!(
            result,
            Err(LedgerError::UnbalancedJournal { debit, credit }) if debit - credit == skew
        );
        prop_assert!(is_unbalanced);
    }

    #[test]
    fn prop_negative_amount_is_rejected(
        amount in positive_amount(),
        position in 0usize..2,
    ) {
        let mut lines = vec![
            NewLine::debit(AccountId::new(), amount),
            NewLine::credit(AccountId::new(), amount),
        ];
        if position == 0 {
            lines[0].base_debit = -amount;
        } else {
            lines[1].base_credit = -amount;
        }
        prop_assert!(matches!(validate_lines(&lines), Err(LedgerError::NegativeAmount)));
    }
}
