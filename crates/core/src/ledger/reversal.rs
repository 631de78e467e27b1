//! Reversal builder for posted journals.
//!
//! A posted journal is never edited. Correcting it means appending a mirror
//! journal that swaps every debit and credit, then stamping the original with
//! the reversal linkage.

use tally_shared::types::JournalId;

use super::error::LedgerError;
use super::types::{Journal, LedgerLine, NewJournal, NewLine};

/// Prefix for reversal transaction numbers.
pub const REVERSAL_PREFIX: &str = "REV-";

/// What reversing a journal amounts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReversalPlan {
    /// The journal was already reversed by the given journal.
    AlreadyReversed(JournalId),
    /// Insert this journal and stamp the original.
    Reverse(NewJournal),
}

/// Plans the reversal of a posted journal.
///
/// The reversal keeps the original's transaction timestamp so both net out in
/// the same period.
///
/// # Errors
///
/// Returns `CannotReverseReversal` if `original` is itself a reversal.
pub fn plan_reversal(original: &Journal, reason: &str) -> Result<ReversalPlan, LedgerError> {
    if let Some(reversed_by) = original.reversed_by_journal_id {
        return Ok(ReversalPlan::AlreadyReversed(reversed_by));
    }
    if original.is_reversal {
        return Err(LedgerError::CannotReverseReversal(original.id.into_inner()));
    }

    Ok(ReversalPlan::Reverse(NewJournal {
        tenant_id: original.tenant_id,
        branch_id: original.branch_id,
        reference: original.reference,
        transaction_number: format!("{REVERSAL_PREFIX}{}", original.transaction_number),
        transaction_date_time: original.transaction_date_time,
        lines: original.lines.iter().map(mirror_line).collect(),
        is_reversal: true,
        reverses_journal_id: Some(original.id),
        reversal_reason: Some(reason.to_string()),
    }))
}

/// Mirrors a single line: base and foreign sides swap independently, the
/// realised amount is negated and the bank link is dropped.
#[must_use]
pub fn mirror_line(line: &LedgerLine) -> NewLine {
    NewLine {
        account_id: line.account_id,
        base_debit: line.base_credit,
        base_credit: line.base_debit,
        foreign_debit: line.foreign_credit,
        foreign_credit: line.foreign_debit,
        foreign_currency: line.foreign_currency.clone(),
        exchange_rate: line.exchange_rate,
        is_inventory_valuation: line.is_inventory_valuation,
        is_transfer_in: line.is_transfer_in,
        bank_transaction_id: None,
        realised_amount: -line.realised_amount,
        description: line.description.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use tally_shared::types::{AccountId, LedgerLineId, TenantId};
    use uuid::Uuid;

    use crate::events::{DocumentRef, ReferenceKind};

    fn line(journal_id: JournalId, line_no: i32, debit: Decimal, credit: Decimal) -> LedgerLine {
        LedgerLine {
            id: LedgerLineId::new(),
            journal_id,
            line_no,
            account_id: AccountId::new(),
            base_debit: debit,
            base_credit: credit,
            foreign_debit: debit * dec!(2),
            foreign_credit: credit * dec!(2),
            foreign_currency: Some("EUR".to_string()),
            exchange_rate: Some(dec!(0.5)),
            is_inventory_valuation: false,
            is_transfer_in: false,
            bank_transaction_id: Some(Uuid::new_v4()),
            realised_amount: dec!(1.25),
            closing_balance: Some(dec!(999)),
            description: Some("line".to_string()),
        }
    }

    fn posted_journal() -> Journal {
        let id = JournalId::new();
        Journal {
            id,
            tenant_id: TenantId::new(),
            branch_id: None,
            reference: DocumentRef::new(ReferenceKind::SalesInvoice, Uuid::new_v4()),
            transaction_number: "INV-0001".to_string(),
            transaction_date_time: Utc::now(),
            lines: vec![
                line(id, 1, dec!(100), Decimal::ZERO),
                line(id, 2, Decimal::ZERO, dec!(100)),
            ],
            is_reversal: false,
            reverses_journal_id: None,
            reversed_by_journal_id: None,
            reversal_reason: None,
            reversed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_reversal_mirrors_lines() {
        let original = posted_journal();
        let ReversalPlan::Reverse(reversal) = plan_reversal(&original, "void").unwrap() else {
            panic!("expected a new reversal");
        };

        assert!(reversal.is_reversal);
        assert_eq!(reversal.reverses_journal_id, Some(original.id));
        assert_eq!(reversal.reversal_reason.as_deref(), Some("void"));
        assert_eq!(reversal.transaction_number, "REV-INV-0001");
        assert_eq!(reversal.transaction_date_time, original.transaction_date_time);
        assert_eq!(reversal.lines.len(), 2);

        let first = &reversal.lines[0];
        assert_eq!(first.base_debit, Decimal::ZERO);
        assert_eq!(first.base_credit, dec!(100));
        assert_eq!(first.foreign_credit, dec!(200));
        assert_eq!(first.realised_amount, dec!(-1.25));
        assert!(first.bank_transaction_id.is_none());
        assert!(reversal.totals().is_balanced());
    }

    #[test]
    fn test_already_reversed_returns_existing() {
        let mut original = posted_journal();
        let existing = JournalId::new();
        original.reversed_by_journal_id = Some(existing);
        assert_eq!(
            plan_reversal(&original, "again").unwrap(),
            ReversalPlan::AlreadyReversed(existing)
        );
    }

    #[test]
    fn test_cannot_reverse_reversal() {
        let mut original = posted_journal();
        original.is_reversal = true;
        assert!(matches!(
            plan_reversal(&original, "nope"),
            Err(LedgerError::CannotReverseReversal(_))
        ));
    }
}
