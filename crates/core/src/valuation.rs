//! Valuation deltas and replacement journals.
//!
//! FIFO costing produces, per originating document, the change each account
//! needs on the document's inventory valuation lines. A posted journal is
//! never edited: the deltas are applied to a copy which replaces the active
//! journal through reverse-and-replace.

use std::collections::BTreeMap;
use std::collections::btree_map;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tally_shared::types::AccountId;

use crate::events::{DocumentRef, TransferDirection};
use crate::ledger::{Journal, LedgerError, NewJournal, NewLine, validate_lines};

/// Change to one account's valuation posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountDelta {
    /// Change to the debit side.
    pub debit_delta: Decimal,
    /// Change to the credit side.
    pub credit_delta: Decimal,
}

impl AccountDelta {
    /// Net change (debit - credit).
    #[must_use]
    pub fn net(&self) -> Decimal {
        self.debit_delta - self.credit_delta
    }

    /// Returns true if the delta has no net effect.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.net().is_zero()
    }
}

/// Deltas for one journal, keyed by account.
pub type AccountDeltas = BTreeMap<AccountId, AccountDelta>;

/// Which journal a set of deltas belongs to.
///
/// `direction` is set only for references that keep two active journals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeltaTarget {
    /// Originating document.
    pub document: DocumentRef,
    /// Transfer leg, if any.
    pub direction: Option<TransferDirection>,
}

/// Deltas aggregated per document, so each document is reposted once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentDeltas(BTreeMap<DeltaTarget, AccountDeltas>);

impl DocumentDeltas {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Books a debit change.
    pub fn debit(&mut self, target: DeltaTarget, account_id: AccountId, amount: Decimal) {
        self.entry(target, account_id).debit_delta += amount;
    }

    /// Books a credit change.
    pub fn credit(&mut self, target: DeltaTarget, account_id: AccountId, amount: Decimal) {
        self.entry(target, account_id).credit_delta += amount;
    }

    fn entry(&mut self, target: DeltaTarget, account_id: AccountId) -> &mut AccountDelta {
        self.0
            .entry(target)
            .or_default()
            .entry(account_id)
            .or_default()
    }

    /// Folds another set into this one.
    pub fn merge(&mut self, other: Self) {
        for (target, accounts) in other.0 {
            for (account_id, delta) in accounts {
                let entry = self.entry(target, account_id);
                entry.debit_delta += delta.debit_delta;
                entry.credit_delta += delta.credit_delta;
            }
        }
    }

    /// Removes and returns every target of the given document.
    pub fn take_document(&mut self, document: DocumentRef) -> Vec<(DeltaTarget, AccountDeltas)> {
        let targets: Vec<DeltaTarget> = self
            .0
            .keys()
            .filter(|t| t.document == document)
            .copied()
            .collect();
        targets
            .into_iter()
            .filter_map(|t| self.0.remove(&t).map(|d| (t, d)))
            .collect()
    }

    /// Drops targets whose deltas are all zero.
    #[must_use]
    pub fn without_zero(self) -> Self {
        Self(
            self.0
                .into_iter()
                .filter(|(_, accounts)| accounts.values().any(|d| !d.is_zero()))
                .collect(),
        )
    }

    /// Returns true if nothing is booked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Deltas of one target.
    #[must_use]
    pub fn get(&self, target: &DeltaTarget) -> Option<&AccountDeltas> {
        self.0.get(target)
    }

    /// Iterates targets in a stable order.
    pub fn iter(&self) -> btree_map::Iter<'_, DeltaTarget, AccountDeltas> {
        self.0.iter()
    }
}

impl IntoIterator for DocumentDeltas {
    type Item = (DeltaTarget, AccountDeltas);
    type IntoIter = btree_map::IntoIter<DeltaTarget, AccountDeltas>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

fn matches_direction(line: &NewLine, direction: Option<TransferDirection>) -> bool {
    direction.is_none_or(|d| line.is_transfer_in == d.is_in())
}

fn set_net(line: &mut NewLine, net: Decimal) {
    if net >= Decimal::ZERO {
        line.base_debit = net;
        line.base_credit = Decimal::ZERO;
    } else {
        line.base_debit = Decimal::ZERO;
        line.base_credit = -net;
    }
}

/// Applies deltas to the valuation lines of `lines`.
///
/// The first valuation line per account matching `direction` absorbs that
/// account's delta and is netted to one side. Accounts with a non-zero delta
/// but no such line get a new valuation line.
pub fn apply_deltas(
    lines: &mut Vec<NewLine>,
    deltas: &AccountDeltas,
    direction: Option<TransferDirection>,
) {
    let mut pending: BTreeMap<AccountId, AccountDelta> = deltas
        .iter()
        .filter(|(_, d)| !d.is_zero())
        .map(|(a, d)| (*a, *d))
        .collect();

    for line in lines.iter_mut() {
        if !line.is_inventory_valuation || !matches_direction(line, direction) {
            continue;
        }
        if let Some(delta) = pending.remove(&line.account_id) {
            let net = line.net() + delta.net();
            set_net(line, net);
        }
    }

    for (account_id, delta) in pending {
        let mut line = NewLine::debit(account_id, Decimal::ZERO).valuation();
        if let Some(d) = direction {
            line = line.transfer(d);
        }
        set_net(&mut line, delta.net());
        lines.push(line);
    }
}

/// Builds the journal that replaces `active` once `deltas` are applied.
///
/// Returns `None` when every delta is zero.
///
/// # Errors
///
/// Returns `UnbalancedJournal` if the replacement would not balance.
pub fn build_replacement(
    active: &Journal,
    deltas: &AccountDeltas,
    direction: Option<TransferDirection>,
) -> Result<Option<NewJournal>, LedgerError> {
    if deltas.values().all(AccountDelta::is_zero) {
        return Ok(None);
    }

    let mut lines: Vec<NewLine> = active.lines.iter().map(|l| l.to_new_line()).collect();
    apply_deltas(&mut lines, deltas, direction);
    validate_lines(&lines)?;

    Ok(Some(NewJournal {
        tenant_id: active.tenant_id,
        branch_id: active.branch_id,
        reference: active.reference,
        transaction_number: active.transaction_number.clone(),
        transaction_date_time: active.transaction_date_time,
        lines,
        is_reversal: false,
        reverses_journal_id: None,
        reversal_reason: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use tally_shared::types::{JournalId, LedgerLineId, TenantId};
    use uuid::Uuid;

    use crate::events::ReferenceKind;
    use crate::ledger::LedgerLine;

    fn posted(lines: Vec<NewLine>) -> Journal {
        let id = JournalId::new();
        Journal {
            id,
            tenant_id: TenantId::new(),
            branch_id: None,
            reference: DocumentRef::new(ReferenceKind::SalesInvoice, Uuid::new_v4()),
            transaction_number: "INV-7".to_string(),
            transaction_date_time: Utc::now(),
            lines: lines
                .into_iter()
                .enumerate()
                .map(|(i, l)| LedgerLine {
                    id: LedgerLineId::new(),
                    journal_id: id,
                    line_no: i32::try_from(i).unwrap() + 1,
                    account_id: l.account_id,
                    base_debit: l.base_debit,
                    base_credit: l.base_credit,
                    foreign_debit: l.foreign_debit,
                    foreign_credit: l.foreign_credit,
                    foreign_currency: l.foreign_currency,
                    exchange_rate: l.exchange_rate,
                    is_inventory_valuation: l.is_inventory_valuation,
                    is_transfer_in: l.is_transfer_in,
                    bank_transaction_id: l.bank_transaction_id,
                    realised_amount: l.realised_amount,
                    closing_balance: None,
                    description: l.description,
                })
                .collect(),
            is_reversal: false,
            reverses_journal_id: None,
            reversed_by_journal_id: None,
            reversal_reason: None,
            reversed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_deltas_fill_valuation_lines() {
        let ar = AccountId::new();
        let sales = AccountId::new();
        let cogs = AccountId::new();
        let inventory = AccountId::new();
        let active = posted(vec![
            NewLine::debit(ar, dec!(100)),
            NewLine::credit(sales, dec!(100)),
            NewLine::debit(cogs, dec!(20)).valuation(),
            NewLine::credit(inventory, dec!(20)).valuation(),
        ]);
        let deltas = AccountDeltas::from([
            (cogs, AccountDelta { debit_delta: dec!(6), credit_delta: Decimal::ZERO }),
            (inventory, AccountDelta { debit_delta: Decimal::ZERO, credit_delta: dec!(6) }),
        ]);

        let replacement = build_replacement(&active, &deltas, None).unwrap().unwrap();

        assert_eq!(replacement.lines.len(), 4);
        assert_eq!(replacement.lines[0], active.lines[0].to_new_line());
        assert_eq!(replacement.lines[2].base_debit, dec!(26));
        assert_eq!(replacement.lines[3].base_credit, dec!(26));
        assert!(replacement.totals().is_balanced());
        assert!(!replacement.is_reversal);
    }

    #[test]
    fn test_negative_delta_flips_side() {
        let cogs = AccountId::new();
        let inventory = AccountId::new();
        let active = posted(vec![
            NewLine::debit(cogs, dec!(5)).valuation(),
            NewLine::credit(inventory, dec!(5)).valuation(),
        ]);
        let deltas = AccountDeltas::from([
            (cogs, AccountDelta { debit_delta: dec!(-8), credit_delta: Decimal::ZERO }),
            (inventory, AccountDelta { debit_delta: Decimal::ZERO, credit_delta: dec!(-8) }),
        ]);

        let replacement = build_replacement(&active, &deltas, None).unwrap().unwrap();
        assert_eq!(replacement.lines[0].base_debit, Decimal::ZERO);
        assert_eq!(replacement.lines[0].base_credit, dec!(3));
        assert_eq!(replacement.lines[1].base_debit, dec!(3));
        assert_eq!(replacement.lines[1].base_credit, Decimal::ZERO);
    }

    #[test]
    fn test_missing_account_gets_new_line() {
        let cogs = AccountId::new();
        let inventory = AccountId::new();
        let other_inventory = AccountId::new();
        let active = posted(vec![
            NewLine::debit(cogs, Decimal::ZERO).valuation(),
            NewLine::credit(inventory, Decimal::ZERO).valuation(),
        ]);
        let deltas = AccountDeltas::from([
            (cogs, AccountDelta { debit_delta: dec!(4), credit_delta: Decimal::ZERO }),
            (other_inventory, AccountDelta { debit_delta: Decimal::ZERO, credit_delta: dec!(4) }),
        ]);

        let replacement = build_replacement(&active, &deltas, None).unwrap().unwrap();
        assert_eq!(replacement.lines.len(), 3);
        let added = &replacement.lines[2];
        assert_eq!(added.account_id, other_inventory);
        assert_eq!(added.base_credit, dec!(4));
        assert!(added.is_inventory_valuation);
    }

    #[test]
    fn test_zero_deltas_are_noop() {
        let active = posted(vec![
            NewLine::debit(AccountId::new(), dec!(1)),
            NewLine::credit(AccountId::new(), dec!(1)),
        ]);
        let deltas = AccountDeltas::from([(AccountId::new(), AccountDelta::default())]);
        assert!(build_replacement(&active, &deltas, None).unwrap().is_none());
    }

    #[test]
    fn test_unbalanced_replacement_rejected() {
        let cogs = AccountId::new();
        let active = posted(vec![
            NewLine::debit(cogs, Decimal::ZERO).valuation(),
            NewLine::credit(AccountId::new(), Decimal::ZERO).valuation(),
        ]);
        let deltas = AccountDeltas::from([(
            cogs,
            AccountDelta { debit_delta: dec!(4), credit_delta: Decimal::ZERO },
        )]);
        assert!(matches!(
            build_replacement(&active, &deltas, None),
            Err(LedgerError::UnbalancedJournal { .. })
        ));
    }

    #[test]
    fn test_direction_filter_only_touches_matching_leg() {
        let clearing = AccountId::new();
        let inventory = AccountId::new();
        let mut lines = vec![
            NewLine::debit(clearing, dec!(10)).valuation().transfer(TransferDirection::Out),
            NewLine::credit(inventory, dec!(10)).valuation().transfer(TransferDirection::Out),
            NewLine::debit(inventory, dec!(10)).valuation().transfer(TransferDirection::In),
        ];
        let deltas = AccountDeltas::from([(
            inventory,
            AccountDelta { debit_delta: Decimal::ZERO, credit_delta: dec!(2) },
        )]);

        apply_deltas(&mut lines, &deltas, Some(TransferDirection::Out));
        assert_eq!(lines[1].base_credit, dec!(12));
        assert_eq!(lines[2].base_debit, dec!(10));
    }

    #[test]
    fn test_document_deltas_aggregate_per_document() {
        let doc = DocumentRef::new(ReferenceKind::SalesInvoice, Uuid::new_v4());
        let target = DeltaTarget { document: doc, direction: None };
        let cogs = AccountId::new();
        let mut deltas = DocumentDeltas::new();
        deltas.debit(target, cogs, dec!(2));
        let mut more = DocumentDeltas::new();
        more.debit(target, cogs, dec!(3));
        deltas.merge(more);

        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas.get(&target).unwrap()[&cogs].debit_delta, dec!(5));

        let taken = deltas.take_document(doc);
        assert_eq!(taken.len(), 1);
        assert!(deltas.is_empty());
    }

    #[test]
    fn test_without_zero_drops_cancelled_documents() {
        let target = DeltaTarget {
            document: DocumentRef::new(ReferenceKind::Bill, Uuid::new_v4()),
            direction: None,
        };
        let account = AccountId::new();
        let mut deltas = DocumentDeltas::new();
        deltas.debit(target, account, dec!(2));
        deltas.debit(target, account, dec!(-2));
        assert!(deltas.without_zero().is_empty());
    }
}
