//! Business rule validation for journals.

use rust_decimal::Decimal;

use super::error::LedgerError;
use super::types::{JournalTotals, NewLine};

/// Validates that a set of lines forms a postable journal.
///
/// Zero-amount lines are allowed: inventory valuation lines are posted at
/// zero and filled in by costing.
///
/// # Errors
///
/// Returns an error if the lines are not balanced or violate business rules.
pub fn validate_lines(lines: &[NewLine]) -> Result<JournalTotals, LedgerError> {
    if lines.len() < 2 {
        return Err(LedgerError::InsufficientLines);
    }

    let mut totals = JournalTotals::default();

    for line in lines {
        let amounts = [
            line.base_debit,
            line.base_credit,
            line.foreign_debit,
            line.foreign_credit,
        ];
        if amounts.iter().any(|a| *a < Decimal::ZERO) {
            return Err(LedgerError::NegativeAmount);
        }
        if line.base_debit > Decimal::ZERO && line.base_credit > Decimal::ZERO {
            return Err(LedgerError::BothSides);
        }

        totals.debit += line.base_debit;
        totals.credit += line.base_credit;
    }

    if !totals.is_balanced() {
        return Err(LedgerError::UnbalancedJournal {
            debit: totals.debit,
            credit: totals.credit,
        });
    }

    Ok(totals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tally_shared::types::AccountId;

    #[test]
    fn test_balanced_lines() {
        let lines = vec![
            NewLine::debit(AccountId::new(), dec!(100.00)),
            NewLine::credit(AccountId::new(), dec!(100.00)),
        ];
        let totals = validate_lines(&lines).unwrap();
        assert_eq!(totals.debit, dec!(100.00));
    }

    #[test]
    fn test_unbalanced_lines() {
        let lines = vec![
            NewLine::debit(AccountId::new(), dec!(100.00)),
            NewLine::credit(AccountId::new(), dec!(50.00)),
        ];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::UnbalancedJournal { .. })
        ));
    }

    #[test]
    fn test_single_line() {
        let lines = vec![NewLine::debit(AccountId::new(), dec!(1))];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::InsufficientLines)
        ));
    }

    #[test]
    fn test_placeholder_lines_allowed() {
        let lines = vec![
            NewLine::debit(AccountId::new(), dec!(50)),
            NewLine::credit(AccountId::new(), dec!(50)),
            NewLine::debit(AccountId::new(), Decimal::ZERO).valuation(),
            NewLine::credit(AccountId::new(), Decimal::ZERO).valuation(),
        ];
        assert!(validate_lines(&lines).is_ok());
    }

    #[test]
    fn test_negative_amount() {
        let lines = vec![
            NewLine::debit(AccountId::new(), dec!(-5)),
            NewLine::credit(AccountId::new(), dec!(-5)),
        ];
        assert!(matches!(
            validate_lines(&lines),
            Err(LedgerError::NegativeAmount)
        ));
    }

    #[test]
    fn test_both_sides() {
        let mut line = NewLine::debit(AccountId::new(), dec!(5));
        line.base_credit = dec!(5);
        let lines = vec![line, NewLine::credit(AccountId::new(), Decimal::ZERO)];
        assert!(matches!(validate_lines(&lines), Err(LedgerError::BothSides)));
    }
}
