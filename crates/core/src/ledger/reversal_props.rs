//! Property-based tests for the reversal builder.

use chrono::Utc;
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

use tally_shared::types::{AccountId, JournalId, LedgerLineId, TenantId};

use crate::events::{DocumentRef, ReferenceKind};
use crate::ledger::reversal::{ReversalPlan, plan_reversal};
use crate::ledger::types::{Journal, LedgerLine};

fn arb_amount() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|n| Decimal::new(n, 2))
}

fn arb_line_pair() -> impl Strategy<Value = (Decimal, Decimal, bool)> {
    (arb_amount(), (0i64..10_000i64).prop_map(|n| Decimal::new(n, 2)), any::<bool>())
}

fn make_line(journal_id: JournalId, line_no: i32, debit: Decimal, credit: Decimal) -> LedgerLine {
    LedgerLine {
        id: LedgerLineId::new(),
        journal_id,
        line_no,
        account_id: AccountId::from_uuid(Uuid::from_u128(u128::try_from(line_no).unwrap_or(0))),
        base_debit: debit,
        base_credit: credit,
        foreign_debit: Decimal::ZERO,
        foreign_credit: Decimal::ZERO,
        foreign_currency: None,
        exchange_rate: None,
        is_inventory_valuation: false,
        is_transfer_in: false,
        bank_transaction_id: None,
        realised_amount: Decimal::ZERO,
        closing_balance: None,
        description: None,
    }
}

/// Balanced journals made of (amount, realised, valuation) debit/credit pairs.
fn arb_journal() -> impl Strategy<Value = Journal> {
    prop::collection::vec(arb_line_pair(), 1..5).prop_map(|pairs| {
        let id = JournalId::new();
        let mut lines = Vec::new();
        for (amount, realised, valuation) in pairs {
            let no = i32::try_from(lines.len()).unwrap_or(0) + 1;
            let mut debit = make_line(id, no, amount, Decimal::ZERO);
            debit.realised_amount = realised;
            debit.is_inventory_valuation = valuation;
            let mut credit = make_line(id, no + 1, Decimal::ZERO, amount);
            credit.is_inventory_valuation = valuation;
            lines.push(debit);
            lines.push(credit);
        }
        Journal {
            id,
            tenant_id: TenantId::new(),
            branch_id: None,
            reference: DocumentRef::new(ReferenceKind::ManualJournal, Uuid::new_v4()),
            transaction_number: "MJ-1".to_string(),
            transaction_date_time: Utc::now(),
            lines,
            is_reversal: false,
            reverses_journal_id: None,
            reversed_by_journal_id: None,
            reversal_reason: None,
            reversed_at: None,
            created_at: Utc::now(),
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// A reversal is balanced and exactly cancels the original per account.
    #[test]
    fn prop_reversal_cancels_original(journal in arb_journal()) {
        let ReversalPlan::Reverse(reversal) = plan_reversal(&journal, "test").unwrap() else {
            return Err(TestCaseError::fail("expected reversal"));
        };

        prop_assert!(reversal.totals().is_balanced());
        prop_assert_eq!(reversal.lines.len(), journal.lines.len());

        for (orig, rev) in journal.lines.iter().zip(&reversal.lines) {
            prop_assert_eq!(orig.account_id, rev.account_id);
            prop_assert_eq!(orig.net() + rev.net(), Decimal::ZERO);
            prop_assert_eq!(orig.realised_amount + rev.realised_amount, Decimal::ZERO);
            prop_assert_eq!(orig.is_inventory_valuation, rev.is_inventory_valuation);
        }
    }

    /// Reversing a reversed journal never plans a second reversal.
    #[test]
    fn prop_second_reversal_is_noop(journal in arb_journal()) {
        let mut journal = journal;
        let first = JournalId::new();
        journal.reversed_by_journal_id = Some(first);
        prop_assert_eq!(
            plan_reversal(&journal, "again").unwrap(),
            ReversalPlan::AlreadyReversed(first)
        );
    }
}
