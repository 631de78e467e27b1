//! Ledger error types.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::events::DocumentRef;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Journal must have at least 2 lines.
    #[error("Journal must have at least 2 lines")]
    InsufficientLines,

    /// Journal is not balanced (debits != credits).
    #[error("Journal is not balanced. Debit: {debit}, Credit: {credit}")]
    UnbalancedJournal {
        /// Total debit amount in base currency.
        debit: Decimal,
        /// Total credit amount in base currency.
        credit: Decimal,
    },

    /// Line amount cannot be negative.
    #[error("Line amount cannot be negative")]
    NegativeAmount,

    /// Line carries both a debit and a credit.
    #[error("Line must specify either debit or credit, not both")]
    BothSides,

    // ========== State Errors ==========
    /// Journal not found.
    #[error("Journal not found: {0}")]
    JournalNotFound(Uuid),

    /// No active journal for the reference.
    #[error("No active journal for {0}")]
    ActiveJournalNotFound(DocumentRef),

    /// A reversal journal cannot itself be reversed.
    #[error("Journal {0} is a reversal and cannot be reversed")]
    CannotReverseReversal(Uuid),

    // ========== Database Errors ==========
    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Returns the error code for logs and downstream consumers.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientLines => "INSUFFICIENT_LINES",
            Self::UnbalancedJournal { .. } => "UNBALANCED_JOURNAL",
            Self::NegativeAmount => "NEGATIVE_AMOUNT",
            Self::BothSides => "BOTH_SIDES",
            Self::JournalNotFound(_) => "JOURNAL_NOT_FOUND",
            Self::ActiveJournalNotFound(_) => "ACTIVE_JOURNAL_NOT_FOUND",
            Self::CannotReverseReversal(_) => "CANNOT_REVERSE_REVERSAL",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}
