//! Reconciliation: loads one tenant's ledger and stock rows and reports
//! inconsistencies. Nothing is repaired.

use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder};
use thiserror::Error;

use tally_core::inventory::{InventoryError, StockMovement, StockValuation};
use tally_core::ledger::LedgerError;
use tally_core::reconcile::ReconciliationReport;
use tally_shared::types::TenantId;

use super::inventory::{movement_from_model, valuation_from_model};
use super::journal::JournalRepository;
use crate::entities::{stock_movements, stock_valuations};

/// Errors raised while loading rows for a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// Ledger rows could not be loaded.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Stock rows could not be loaded.
    #[error(transparent)]
    Inventory(#[from] InventoryError),
}

/// Reconciliation repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconciliationRepository;

impl ReconciliationRepository {
    /// Checks every journal, movement, and allocation row of a tenant.
    ///
    /// # Errors
    ///
    /// Returns an error if the rows cannot be loaded.
    pub async fn run<C: ConnectionTrait>(
        conn: &C,
        tenant_id: TenantId,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        let journals = JournalRepository::load_tenant(conn, tenant_id).await?;
        let movements = Self::movements(conn, tenant_id).await?;
        let valuations = Self::valuations(conn, tenant_id).await?;

        let report = ReconciliationReport::build(tenant_id, &journals, &movements, &valuations);
        for finding in &report.findings {
            tracing::warn!(
                tenant_id = %tenant_id,
                finding = finding.kind(),
                detail = ?finding,
                "Reconciliation finding"
            );
        }
        tracing::info!(
            tenant_id = %tenant_id,
            journals = report.journals_checked,
            movements = report.movements_checked,
            valuations = report.valuations_checked,
            findings = report.findings.len(),
            "Reconciliation finished"
        );
        Ok(report)
    }

    async fn movements<C: ConnectionTrait>(
        conn: &C,
        tenant_id: TenantId,
    ) -> Result<Vec<StockMovement>, InventoryError> {
        stock_movements::Entity::find()
            .filter(stock_movements::Column::TenantId.eq(tenant_id.into_inner()))
            .order_by_asc(stock_movements::Column::StockDate)
            .order_by_asc(stock_movements::Column::SequenceNo)
            .all(conn)
            .await
            .map_err(|e| InventoryError::Database(e.to_string()))?
            .into_iter()
            .map(movement_from_model)
            .collect()
    }

    async fn valuations<C: ConnectionTrait>(
        conn: &C,
        tenant_id: TenantId,
    ) -> Result<Vec<StockValuation>, InventoryError> {
        Ok(stock_valuations::Entity::find()
            .filter(stock_valuations::Column::TenantId.eq(tenant_id.into_inner()))
            .order_by_asc(stock_valuations::Column::CreatedAt)
            .all(conn)
            .await
            .map_err(|e| InventoryError::Database(e.to_string()))?
            .into_iter()
            .map(valuation_from_model)
            .collect())
    }
}
