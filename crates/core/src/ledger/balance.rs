//! Account balance calculations.
//!
//! Closing balances on ledger lines are a derived cache: the running sum of
//! `debit - credit` per account, in (transaction time, journal creation, line
//! number) order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{AccountId, LedgerLineId};

/// Account balance at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// The account ID.
    pub account_id: AccountId,
    /// Total debit amount.
    pub debit_total: Decimal,
    /// Total credit amount.
    pub credit_total: Decimal,
    /// Net balance (debit - credit).
    pub balance: Decimal,
}

impl AccountBalance {
    /// Creates an empty balance.
    #[must_use]
    pub fn new(account_id: AccountId) -> Self {
        Self {
            account_id,
            debit_total: Decimal::ZERO,
            credit_total: Decimal::ZERO,
            balance: Decimal::ZERO,
        }
    }

    /// Adds a debit amount.
    pub fn add_debit(&mut self, amount: Decimal) {
        self.debit_total += amount;
        self.balance = self.debit_total - self.credit_total;
    }

    /// Adds a credit amount.
    pub fn add_credit(&mut self, amount: Decimal) {
        self.credit_total += amount;
        self.balance = self.debit_total - self.credit_total;
    }
}

/// One posted line as seen by balance materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceRow {
    /// The line to stamp.
    pub line_id: LedgerLineId,
    /// Account of the line.
    pub account_id: AccountId,
    /// Journal transaction timestamp.
    pub transaction_date_time: DateTime<Utc>,
    /// Journal insert timestamp.
    pub created_at: DateTime<Utc>,
    /// Line position within its journal.
    pub line_no: i32,
    /// Base debit.
    pub debit: Decimal,
    /// Base credit.
    pub credit: Decimal,
}

/// Recomputes closing balances.
///
/// `opening` holds each account's balance just before the first row; accounts
/// without an entry start at zero. Rows may arrive in any order.
#[must_use]
pub fn running_balances(
    opening: &HashMap<AccountId, Decimal>,
    mut rows: Vec<BalanceRow>,
) -> Vec<(LedgerLineId, Decimal)> {
    rows.sort_by(|a, b| {
        (a.transaction_date_time, a.created_at, a.line_no)
            .cmp(&(b.transaction_date_time, b.created_at, b.line_no))
    });

    let mut running: HashMap<AccountId, Decimal> = opening.clone();
    rows.into_iter()
        .map(|row| {
            let balance = running.entry(row.account_id).or_insert(Decimal::ZERO);
            *balance += row.debit - row.credit;
            (row.line_id, *balance)
        })
        .collect()
}
