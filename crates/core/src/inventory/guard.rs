//! Non-negative stock check.

use rust_decimal::Decimal;

use super::error::InventoryError;
use super::types::StockMovement;

/// Checks that the running signed quantity over the active rows of one key
/// never drops below zero.
///
/// # Errors
///
/// Returns `NegativeStock` naming the first offending movement.
pub fn check_non_negative<'a>(
    rows: impl IntoIterator<Item = &'a StockMovement>,
) -> Result<(), InventoryError> {
    let mut active: Vec<&StockMovement> = rows.into_iter().filter(|m| m.is_active()).collect();
    active.sort_by_key(|m| m.position());

    let mut running = Decimal::ZERO;
    for movement in active {
        running += movement.quantity;
        if running < Decimal::ZERO {
            return Err(InventoryError::NegativeStock {
                movement_id: movement.id,
                running_qty: running,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::testing::{issue, receipt};
    use rust_decimal_macros::dec;

    #[test]
    fn test_non_negative_history_passes() {
        let rows = vec![receipt(1, 1, dec!(5), dec!(1)), issue(2, 2, dec!(5))];
        assert!(check_non_negative(&rows).is_ok());
    }

    #[test]
    fn test_order_is_by_stock_date_not_input() {
        // issue on day 1 before the day 2 receipt
        let rows = vec![receipt(2, 1, dec!(5), dec!(1)), issue(1, 2, dec!(3))];
        let err = check_non_negative(&rows).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::NegativeStock { running_qty, .. } if running_qty == dec!(-3)
        ));
    }

    #[test]
    fn test_inactive_rows_ignored() {
        let mut gone = receipt(1, 1, dec!(5), dec!(1));
        gone.reversed_by_movement_id = Some(tally_shared::types::MovementId::new());
        let rows = vec![gone, issue(2, 2, dec!(1))];
        assert!(check_non_negative(&rows).is_err());
    }
}
