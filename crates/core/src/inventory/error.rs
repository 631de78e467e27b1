//! Inventory costing errors.

use rust_decimal::Decimal;
use thiserror::Error;

use tally_shared::types::{MovementId, ProductId, TenantId, WarehouseId};

use crate::lock::LockError;

use super::types::{ProductType, StockKey};

/// Errors raised by FIFO costing and rebuilds.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// Outgoing demand exceeds the FIFO layers available for the key.
    #[error(
        "Insufficient FIFO layers: product_id={product_id} product_type={product_type} \
         warehouse_id={warehouse_id} batch={batch} qty_missing={qty_missing}"
    )]
    InsufficientLayers {
        /// Product or variant id.
        product_id: ProductId,
        /// Product or variant.
        product_type: ProductType,
        /// Warehouse.
        warehouse_id: WarehouseId,
        /// Batch number (empty when not batch-tracked).
        batch: String,
        /// Quantity that could not be covered.
        qty_missing: Decimal,
    },

    /// Running on-hand quantity would drop below zero.
    #[error("Stock would go negative at movement {movement_id}: running quantity {running_qty}")]
    NegativeStock {
        /// First movement at which the running quantity is negative.
        movement_id: MovementId,
        /// Running quantity after that movement.
        running_qty: Decimal,
    },

    /// Movements of one batch span more than one key or tenant.
    #[error("Malformed scope: {0}")]
    MalformedScope(String),

    /// Quantity is invalid for the movement kind.
    #[error("Invalid quantity {quantity} for {kind} movement")]
    InvalidQuantity {
        /// Movement kind name.
        kind: &'static str,
        /// Offending quantity.
        quantity: Decimal,
    },

    /// A return pegged to the last incoming cost has no earlier incoming layer.
    #[error("No incoming cost to peg return {0} to")]
    NoCostReference(MovementId),

    /// Movement not found.
    #[error("Stock movement not found: {0}")]
    MovementNotFound(MovementId),

    /// The rebuild lock of the key could not be taken.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl InventoryError {
    /// Builds a shortfall error for the given key.
    #[must_use]
    pub fn insufficient(key: &StockKey, qty_missing: Decimal) -> Self {
        Self::InsufficientLayers {
            product_id: key.product_id,
            product_type: key.product_type,
            warehouse_id: key.warehouse_id,
            batch: key.batch.clone(),
            qty_missing,
        }
    }

    /// Recovers the rebuild scope from a shortfall.
    #[must_use]
    pub fn shortfall_scope(&self, tenant_id: TenantId) -> Option<StockKey> {
        match self {
            Self::InsufficientLayers {
                product_id,
                product_type,
                warehouse_id,
                batch,
                ..
            } => Some(StockKey {
                tenant_id,
                warehouse_id: *warehouse_id,
                product_id: *product_id,
                product_type: *product_type,
                batch: batch.clone(),
            }),
            _ => None,
        }
    }

    /// Returns the error code for logs and downstream consumers.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientLayers { .. } => "INSUFFICIENT_LAYERS",
            Self::NegativeStock { .. } => "NEGATIVE_STOCK",
            Self::MalformedScope(_) => "MALFORMED_SCOPE",
            Self::InvalidQuantity { .. } => "INVALID_QUANTITY",
            Self::NoCostReference(_) => "NO_COST_REFERENCE",
            Self::MovementNotFound(_) => "MOVEMENT_NOT_FOUND",
            Self::Lock(e) => e.error_code(),
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Returns true if a rebuild-and-retry may clear the error.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::InsufficientLayers { .. })
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Lock(e) => e.is_retryable(),
            other => matches!(other, Self::Database(_)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn key() -> StockKey {
        StockKey {
            tenant_id: TenantId::new(),
            warehouse_id: WarehouseId::from_uuid(Uuid::nil()),
            product_id: ProductId::from_uuid(Uuid::nil()),
            product_type: ProductType::Single,
            batch: String::new(),
        }
    }

    #[test]
    fn test_shortfall_display_names_scope() {
        let err = InventoryError::insufficient(&key(), dec!(1));
        let text = err.to_string();
        assert!(text.contains("product_type=single"));
        assert!(text.contains("warehouse_id=00000000-0000-0000-0000-000000000000"));
        assert!(text.contains("qty_missing=1"));
    }

    #[test]
    fn test_shortfall_scope_round_trip() {
        let key = key();
        let err = InventoryError::insufficient(&key, dec!(3));
        assert_eq!(err.shortfall_scope(key.tenant_id), Some(key));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_negative_stock_is_fatal() {
        let err = InventoryError::NegativeStock {
            movement_id: MovementId::new(),
            running_qty: dec!(-1),
        };
        assert!(!err.is_recoverable());
        assert!(!err.is_retryable());
        assert_eq!(err.error_code(), "NEGATIVE_STOCK");
        assert!(err.shortfall_scope(TenantId::new()).is_none());
    }

    #[test]
    fn test_rebuild_lock_timeout_is_retryable() {
        let err = InventoryError::from(LockError::Timeout {
            name: key().lock_name(),
            waited: std::time::Duration::from_secs(30),
        });
        assert_eq!(err.error_code(), "LOCK_TIMEOUT");
        assert!(err.is_retryable());
        assert!(!err.is_recoverable());
    }
}
