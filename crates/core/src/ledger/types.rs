//! Journal and ledger line domain types.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tally_shared::types::{AccountId, BranchId, JournalId, LedgerLineId, TenantId};

use crate::events::{DocumentRef, TransferDirection};

/// A posted ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerLine {
    /// Line ID.
    pub id: LedgerLineId,
    /// Journal this line belongs to.
    pub journal_id: JournalId,
    /// Position within the journal, starting at 1.
    pub line_no: i32,
    /// Account being posted to.
    pub account_id: AccountId,
    /// Debit in base currency.
    pub base_debit: Decimal,
    /// Credit in base currency.
    pub base_credit: Decimal,
    /// Debit in foreign currency.
    pub foreign_debit: Decimal,
    /// Credit in foreign currency.
    pub foreign_credit: Decimal,
    /// Foreign currency code, when the line carries foreign amounts.
    pub foreign_currency: Option<String>,
    /// Exchange rate applied (foreign to base).
    pub exchange_rate: Option<Decimal>,
    /// Whether this line carries inventory valuation.
    pub is_inventory_valuation: bool,
    /// Whether this line belongs to the inbound leg of a transfer.
    pub is_transfer_in: bool,
    /// Bank feed transaction matched to this line.
    pub bank_transaction_id: Option<Uuid>,
    /// Realised exchange gain or loss.
    pub realised_amount: Decimal,
    /// Running account balance after this line (derived cache).
    pub closing_balance: Option<Decimal>,
    /// Optional description.
    pub description: Option<String>,
}

impl LedgerLine {
    /// Net effect on the account (debit - credit) in base currency.
    #[must_use]
    pub fn net(&self) -> Decimal {
        self.base_debit - self.base_credit
    }

    /// Converts a posted line back into the input form, dropping derived state.
    #[must_use]
    pub fn to_new_line(&self) -> NewLine {
        NewLine {
            account_id: self.account_id,
            base_debit: self.base_debit,
            base_credit: self.base_credit,
            foreign_debit: self.foreign_debit,
            foreign_credit: self.foreign_credit,
            foreign_currency: self.foreign_currency.clone(),
            exchange_rate: self.exchange_rate,
            is_inventory_valuation: self.is_inventory_valuation,
            is_transfer_in: self.is_transfer_in,
            bank_transaction_id: self.bank_transaction_id,
            realised_amount: self.realised_amount,
            description: self.description.clone(),
        }
    }
}

/// A ledger line to be posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLine {
    /// Account being posted to.
    pub account_id: AccountId,
    /// Debit in base currency.
    pub base_debit: Decimal,
    /// Credit in base currency.
    pub base_credit: Decimal,
    /// Debit in foreign currency.
    pub foreign_debit: Decimal,
    /// Credit in foreign currency.
    pub foreign_credit: Decimal,
    /// Foreign currency code.
    pub foreign_currency: Option<String>,
    /// Exchange rate applied.
    pub exchange_rate: Option<Decimal>,
    /// Whether this line carries inventory valuation.
    pub is_inventory_valuation: bool,
    /// Whether this line belongs to the inbound leg of a transfer.
    pub is_transfer_in: bool,
    /// Bank feed transaction matched to this line.
    pub bank_transaction_id: Option<Uuid>,
    /// Realised exchange gain or loss.
    pub realised_amount: Decimal,
    /// Optional description.
    pub description: Option<String>,
}

impl NewLine {
    fn blank(account_id: AccountId) -> Self {
        Self {
            account_id,
            base_debit: Decimal::ZERO,
            base_credit: Decimal::ZERO,
            foreign_debit: Decimal::ZERO,
            foreign_credit: Decimal::ZERO,
            foreign_currency: None,
            exchange_rate: None,
            is_inventory_valuation: false,
            is_transfer_in: false,
            bank_transaction_id: None,
            realised_amount: Decimal::ZERO,
            description: None,
        }
    }

    /// A base-currency debit line.
    #[must_use]
    pub fn debit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            base_debit: amount,
            ..Self::blank(account_id)
        }
    }

    /// A base-currency credit line.
    #[must_use]
    pub fn credit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            base_credit: amount,
            ..Self::blank(account_id)
        }
    }

    /// Marks the line as an inventory valuation line.
    #[must_use]
    pub fn valuation(mut self) -> Self {
        self.is_inventory_valuation = true;
        self
    }

    /// Marks the line as belonging to the given transfer leg.
    #[must_use]
    pub fn transfer(mut self, direction: TransferDirection) -> Self {
        self.is_transfer_in = direction.is_in();
        self
    }

    /// Attaches foreign currency amounts.
    #[must_use]
    pub fn with_foreign(
        mut self,
        currency: impl Into<String>,
        rate: Decimal,
        debit: Decimal,
        credit: Decimal,
    ) -> Self {
        self.foreign_currency = Some(currency.into());
        self.exchange_rate = Some(rate);
        self.foreign_debit = debit;
        self.foreign_credit = credit;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Net effect on the account (debit - credit) in base currency.
    #[must_use]
    pub fn net(&self) -> Decimal {
        self.base_debit - self.base_credit
    }

    /// Returns true if every amount on the line is zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.base_debit.is_zero()
            && self.base_credit.is_zero()
            && self.foreign_debit.is_zero()
            && self.foreign_credit.is_zero()
    }
}

/// A posted journal with its lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    /// Journal ID.
    pub id: JournalId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Branch, if any.
    pub branch_id: Option<BranchId>,
    /// Originating document.
    pub reference: DocumentRef,
    /// Human-facing transaction number.
    pub transaction_number: String,
    /// Business timestamp.
    pub transaction_date_time: DateTime<Utc>,
    /// Lines in posting order.
    pub lines: Vec<LedgerLine>,
    /// Whether this journal reverses another.
    pub is_reversal: bool,
    /// The journal this one reverses.
    pub reverses_journal_id: Option<JournalId>,
    /// The journal that reversed this one.
    pub reversed_by_journal_id: Option<JournalId>,
    /// Reason given for the reversal.
    pub reversal_reason: Option<String>,
    /// When the journal was reversed.
    pub reversed_at: Option<DateTime<Utc>>,
    /// Insert timestamp.
    pub created_at: DateTime<Utc>,
}

impl Journal {
    /// An active journal is neither a reversal nor reversed.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.is_reversal && self.reversed_by_journal_id.is_none()
    }

    /// Totals of the journal's base amounts.
    #[must_use]
    pub fn totals(&self) -> JournalTotals {
        JournalTotals::from_pairs(self.lines.iter().map(|l| (l.base_debit, l.base_credit)))
    }

    /// Returns true if any line belongs to the given transfer leg.
    #[must_use]
    pub fn has_direction(&self, direction: TransferDirection) -> bool {
        self.lines
            .iter()
            .any(|l| l.is_transfer_in == direction.is_in())
    }
}

/// A journal to be posted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJournal {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Branch, if any.
    pub branch_id: Option<BranchId>,
    /// Originating document.
    pub reference: DocumentRef,
    /// Human-facing transaction number.
    pub transaction_number: String,
    /// Business timestamp.
    pub transaction_date_time: DateTime<Utc>,
    /// Lines in posting order.
    pub lines: Vec<NewLine>,
    /// Whether this journal reverses another.
    pub is_reversal: bool,
    /// The journal this one reverses.
    pub reverses_journal_id: Option<JournalId>,
    /// Reason given for the reversal.
    pub reversal_reason: Option<String>,
}

impl NewJournal {
    /// A regular (non-reversal) journal.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        reference: DocumentRef,
        transaction_number: impl Into<String>,
        transaction_date_time: DateTime<Utc>,
        lines: Vec<NewLine>,
    ) -> Self {
        Self {
            tenant_id,
            branch_id: None,
            reference,
            transaction_number: transaction_number.into(),
            transaction_date_time,
            lines,
            is_reversal: false,
            reverses_journal_id: None,
            reversal_reason: None,
        }
    }

    /// Sets the branch.
    #[must_use]
    pub fn with_branch(mut self, branch_id: BranchId) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    /// Totals of the journal's base amounts.
    #[must_use]
    pub fn totals(&self) -> JournalTotals {
        JournalTotals::from_pairs(self.lines.iter().map(|l| (l.base_debit, l.base_credit)))
    }
}

/// Debit and credit totals of a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JournalTotals {
    /// Total base debits.
    pub debit: Decimal,
    /// Total base credits.
    pub credit: Decimal,
}

impl JournalTotals {
    fn from_pairs(pairs: impl Iterator<Item = (Decimal, Decimal)>) -> Self {
        pairs.fold(Self::default(), |acc, (d, c)| Self {
            debit: acc.debit + d,
            credit: acc.credit + c,
        })
    }

    /// Returns true if debits equal credits.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.debit == self.credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ReferenceKind;
    use rust_decimal_macros::dec;

    #[test]
    fn test_line_builders() {
        let account = AccountId::new();
        let line = NewLine::debit(account, dec!(10))
            .valuation()
            .transfer(TransferDirection::In);
        assert_eq!(line.base_debit, dec!(10));
        assert_eq!(line.base_credit, dec!(0));
        assert!(line.is_inventory_valuation);
        assert!(line.is_transfer_in);
        assert_eq!(line.net(), dec!(10));
    }

    #[test]
    fn test_zero_line() {
        assert!(NewLine::debit(AccountId::new(), Decimal::ZERO).is_zero());
        assert!(!NewLine::credit(AccountId::new(), dec!(0.01)).is_zero());
    }

    #[test]
    fn test_new_journal_totals() {
        let journal = NewJournal::new(
            TenantId::new(),
            DocumentRef::new(ReferenceKind::ManualJournal, Uuid::nil()),
            "MJ-1",
            Utc::now(),
            vec![
                NewLine::debit(AccountId::new(), dec!(60)),
                NewLine::debit(AccountId::new(), dec!(40)),
                NewLine::credit(AccountId::new(), dec!(100)),
            ],
        );
        let totals = journal.totals();
        assert_eq!(totals.debit, dec!(100));
        assert_eq!(totals.credit, dec!(100));
        assert!(totals.is_balanced());
    }
}
