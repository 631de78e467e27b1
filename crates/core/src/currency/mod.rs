//! Multi-currency amount handling.

pub mod conversion;
pub mod resolve;

pub use conversion::{UNIT_COST_DP, convert_amount, round_amount, round_to, round_unit_cost};
pub use resolve::{AMOUNT_DP, AmountCase, ResolvedAmounts, resolve_amounts};
