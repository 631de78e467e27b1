//! Currency conversion and rounding.
//!
//! All rounding uses banker's rounding (round half to even). Amounts are kept
//! at 4 decimal places and unit costs at 6.

use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;

/// Decimal places for unit costs.
pub const UNIT_COST_DP: u32 = 6;

/// Converts an amount using the given exchange rate.
#[must_use]
pub fn convert_amount(amount: Decimal, rate: Decimal, decimal_places: u32) -> Decimal {
    round_to(amount * rate, decimal_places)
}

/// Rounds with banker's rounding.
#[must_use]
pub fn round_to(value: Decimal, decimal_places: u32) -> Decimal {
    value.round_dp_with_strategy(decimal_places, RoundingStrategy::MidpointNearestEven)
}

/// Rounds a monetary amount to the ledger's precision.
#[must_use]
pub fn round_amount(value: Decimal) -> Decimal {
    round_to(value, super::resolve::AMOUNT_DP)
}

/// Rounds a unit cost to the inventory's precision.
#[must_use]
pub fn round_unit_cost(value: Decimal) -> Decimal {
    round_to(value, UNIT_COST_DP)
}
