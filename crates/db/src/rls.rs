//! Row-Level Security (RLS) context management.
//!
//! Ledger and inventory tables carry a `tenant_isolation` policy keyed on
//! the `app.current_tenant_id` setting. Every transaction that touches them
//! sets the tenant first.
//!
//! # Usage
//!
//! ```ignore
//! use tally_db::rls::RlsExt;
//!
//! let rls = db.with_rls(tenant_id).await?;
//! let journals = journals::Entity::find().all(rls.transaction()).await?;
//! rls.commit().await?;
//! ```

use sea_orm::{ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};

use tally_shared::types::TenantId;

/// A transaction with the tenant RLS context already set.
pub struct RlsConnection {
    txn: DatabaseTransaction,
}

impl RlsConnection {
    /// Begins a transaction and sets `app.current_tenant_id` with `SET LOCAL`,
    /// which scopes the setting to the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction cannot be started or the context
    /// cannot be set.
    pub async fn new(db: &DatabaseConnection, tenant_id: TenantId) -> Result<Self, DbErr> {
        let txn = db.begin().await?;
        set_rls_context(&txn, tenant_id).await?;
        Ok(Self { txn })
    }

    /// Returns the underlying transaction.
    #[must_use]
    pub fn transaction(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Unwraps the transaction, keeping the context set.
    #[must_use]
    pub fn into_transaction(self) -> DatabaseTransaction {
        self.txn
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails.
    pub async fn commit(self) -> Result<(), DbErr> {
        self.txn.commit().await
    }

    /// Rolls back the transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback fails.
    pub async fn rollback(self) -> Result<(), DbErr> {
        self.txn.rollback().await
    }
}

/// Extension trait for opening tenant-scoped transactions.
#[async_trait::async_trait]
pub trait RlsExt {
    /// Begins a transaction scoped to `tenant_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the RLS connection cannot be created.
    async fn with_rls(&self, tenant_id: TenantId) -> Result<RlsConnection, DbErr>;
}

#[async_trait::async_trait]
impl RlsExt for DatabaseConnection {
    async fn with_rls(&self, tenant_id: TenantId) -> Result<RlsConnection, DbErr> {
        RlsConnection::new(self, tenant_id).await
    }
}

fn context_sql(tenant_id: TenantId) -> String {
    // a typed uuid renders as hex and dashes only
    format!("SET LOCAL app.current_tenant_id = '{tenant_id}'")
}

/// Sets the tenant context on an existing transaction.
///
/// # Errors
///
/// Returns an error if the context cannot be set.
pub async fn set_rls_context(txn: &DatabaseTransaction, tenant_id: TenantId) -> Result<(), DbErr> {
    txn.execute_unprepared(&context_sql(tenant_id)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_rls_sql_format() {
        let tenant_id = TenantId::from_uuid(
            Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
        );
        assert_eq!(
            context_sql(tenant_id),
            "SET LOCAL app.current_tenant_id = '550e8400-e29b-41d4-a716-446655440000'"
        );
    }
}
