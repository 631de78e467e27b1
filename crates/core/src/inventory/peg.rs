//! Credit-note cost pegging.

use rust_decimal::Decimal;

use tally_shared::types::MovementId;

use super::error::InventoryError;
use super::types::CostPeg;

/// Resolves the unit cost of a returned unit.
///
/// `last_incoming` is the unit cost of the latest receipt at or before the
/// return's position.
///
/// # Errors
///
/// Returns `NoCostReference` for a last-incoming peg with no earlier receipt.
pub fn pegged_unit_cost(
    peg: CostPeg,
    last_incoming: Option<Decimal>,
    movement_id: MovementId,
) -> Result<Decimal, InventoryError> {
    match peg {
        CostPeg::Fixed(price) => Ok(price),
        CostPeg::LastIncoming => last_incoming.ok_or(InventoryError::NoCostReference(movement_id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fixed_peg_ignores_history() {
        let cost = pegged_unit_cost(CostPeg::Fixed(dec!(4.5)), Some(dec!(9)), MovementId::new());
        assert_eq!(cost.unwrap(), dec!(4.5));
    }

    #[test]
    fn test_last_incoming_peg() {
        let cost = pegged_unit_cost(CostPeg::LastIncoming, Some(dec!(3)), MovementId::new());
        assert_eq!(cost.unwrap(), dec!(3));
    }

    #[test]
    fn test_last_incoming_without_receipt() {
        let result = pegged_unit_cost(CostPeg::LastIncoming, None, MovementId::new());
        assert!(matches!(result, Err(InventoryError::NoCostReference(_))));
    }
}
