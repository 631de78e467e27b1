//! Double-entry ledger model.
//!
//! This module implements the append-only journal protocol:
//! - Journal and line types
//! - Balance validation
//! - Reversal builder (the only way to "change" a posted journal)
//! - Closing balance materialization

pub mod balance;
pub mod error;
pub mod reversal;
pub mod types;
pub mod validation;

#[cfg(test)]
mod reversal_props;
#[cfg(test)]
mod validation_props;

pub use balance::{AccountBalance, BalanceRow, running_balances};
pub use error::LedgerError;
pub use reversal::{REVERSAL_PREFIX, ReversalPlan, mirror_line, plan_reversal};
pub use types::{Journal, JournalTotals, LedgerLine, NewJournal, NewLine};
pub use validation::validate_lines;
