//! Base/foreign amount resolution for a single ledger line.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::conversion::convert_amount;

/// Decimal places for base-currency amounts.
pub const AMOUNT_DP: u32 = 4;

/// Which row of the resolution table applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AmountCase {
    /// Transaction is in the base currency; no foreign side.
    BaseTransaction,
    /// Account is denominated in the transaction currency.
    AccountInTransactionCurrency,
    /// Account is denominated in the base currency.
    AccountInBaseCurrency,
    /// Account is denominated in a third currency.
    ThirdCurrencyAccount,
}

/// Result of [`resolve_amounts`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAmounts {
    /// Amount in the tenant's base currency.
    pub base_amount: Decimal,
    /// Amount in the foreign currency (zero when there is none).
    pub foreign_amount: Decimal,
    /// Currency of `foreign_amount`, if any.
    pub foreign_currency: Option<String>,
    /// Rate actually applied.
    pub rate: Decimal,
    /// Table row that produced the result.
    pub case: AmountCase,
}

/// Resolves the base and foreign amounts of a line.
///
/// `rate` converts one unit of the transaction currency into the base
/// currency. A zero rate on a foreign transaction is treated as 1.
#[must_use]
pub fn resolve_amounts(
    base_currency: &str,
    transaction_currency: &str,
    account_currency: &str,
    amount: Decimal,
    rate: Decimal,
) -> ResolvedAmounts {
    if transaction_currency == base_currency {
        return ResolvedAmounts {
            base_amount: amount,
            foreign_amount: Decimal::ZERO,
            foreign_currency: None,
            rate: Decimal::ONE,
            case: AmountCase::BaseTransaction,
        };
    }

    let rate = if rate.is_zero() { Decimal::ONE } else { rate };
    let base_amount = convert_amount(amount, rate, AMOUNT_DP);

    if account_currency == base_currency {
        return ResolvedAmounts {
            base_amount,
            foreign_amount: Decimal::ZERO,
            foreign_currency: None,
            rate,
            case: AmountCase::AccountInBaseCurrency,
        };
    }

    let case = if account_currency == transaction_currency {
        AmountCase::AccountInTransactionCurrency
    } else {
        AmountCase::ThirdCurrencyAccount
    };

    ResolvedAmounts {
        base_amount,
        foreign_amount: amount,
        foreign_currency: Some(transaction_currency.to_string()),
        rate,
        case,
    }
}
