//! Idempotency key repository.
//!
//! `begin` runs in a short transaction of its own that commits before the
//! handler starts, so a STARTED row is visible to every other worker for the
//! whole run. A concurrent duplicate sees it and gets `InProgress` instead of
//! waiting. `mark_succeeded` runs on the handler's transaction and commits
//! with its effects.

use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::{Expr, OnConflict, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter, Set,
};
use uuid::Uuid;

use tally_core::idempotency::{
    BeginOutcome, Decision, IdempotencyError, IdempotencyRecord, decide,
};
use tally_shared::types::TenantId;

use crate::entities::idempotency_keys;
use crate::entities::sea_orm_active_enums::IdempotencyStatus as DbStatus;

fn db_err(e: sea_orm::DbErr) -> IdempotencyError {
    IdempotencyError::Database(e.to_string())
}

fn status_value(status: DbStatus) -> SimpleExpr {
    idempotency_keys::Column::Status.save_as(Expr::val(status))
}

fn record_from_model(model: idempotency_keys::Model) -> IdempotencyRecord {
    IdempotencyRecord {
        tenant_id: TenantId::from_uuid(model.tenant_id),
        handler_name: model.handler_name,
        message_id: model.message_id,
        status: model.status.into(),
        last_error: model.last_error,
        updated_at: model.updated_at.with_timezone(&Utc),
    }
}

fn key_filter(tenant_id: TenantId, handler_name: &str, message_id: Uuid) -> Condition {
    Condition::all()
        .add(idempotency_keys::Column::TenantId.eq(tenant_id.into_inner()))
        .add(idempotency_keys::Column::HandlerName.eq(handler_name))
        .add(idempotency_keys::Column::MessageId.eq(message_id))
}

/// Idempotency key repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdempotencyRepository;

impl IdempotencyRepository {
    /// Claims a key for a handler run.
    ///
    /// Inserts a STARTED row; if the key exists, a SUCCEEDED run is skipped
    /// and a FAILED or stale STARTED run is taken over. Callers commit `txn`
    /// before running the handler.
    ///
    /// # Errors
    ///
    /// Returns `InProgress` when another live run holds the key.
    pub async fn begin(
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        handler_name: &str,
        message_id: Uuid,
        liveness: Duration,
    ) -> Result<BeginOutcome, IdempotencyError> {
        let now: DateTime<FixedOffset> = Utc::now().into();
        let row = idempotency_keys::ActiveModel {
            tenant_id: Set(tenant_id.into_inner()),
            handler_name: Set(handler_name.to_string()),
            message_id: Set(message_id),
            status: Set(DbStatus::Started),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let inserted = idempotency_keys::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    idempotency_keys::Column::TenantId,
                    idempotency_keys::Column::HandlerName,
                    idempotency_keys::Column::MessageId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(txn)
            .await
            .map_err(db_err)?;
        if inserted == 1 {
            return Ok(BeginOutcome::Proceed);
        }

        let existing = Self::load(txn, tenant_id, handler_name, message_id)
            .await?
            .ok_or_else(|| {
                IdempotencyError::Database(format!(
                    "idempotency key {handler_name}/{message_id} vanished after conflict"
                ))
            })?;

        match decide(&existing, Utc::now(), liveness)? {
            Decision::Skip => {
                tracing::info!(
                    tenant_id = %tenant_id,
                    handler = handler_name,
                    message_id = %message_id,
                    "Message already handled, skipping"
                );
                Ok(BeginOutcome::Skip)
            }
            Decision::Reclaim => {
                let observed: DateTime<FixedOffset> = existing.updated_at.into();
                let claimed = idempotency_keys::Entity::update_many()
                    .col_expr(idempotency_keys::Column::Status, status_value(DbStatus::Started))
                    .col_expr(idempotency_keys::Column::UpdatedAt, Expr::value(now))
                    .filter(key_filter(tenant_id, handler_name, message_id))
                    .filter(idempotency_keys::Column::Status.eq(DbStatus::from(existing.status)))
                    .filter(idempotency_keys::Column::UpdatedAt.eq(observed))
                    .exec(txn)
                    .await
                    .map_err(db_err)?;
                if claimed.rows_affected != 1 {
                    return Err(IdempotencyError::InProgress {
                        handler_name: handler_name.to_string(),
                        message_id,
                    });
                }
                tracing::warn!(
                    tenant_id = %tenant_id,
                    handler = handler_name,
                    message_id = %message_id,
                    previous = %existing.status,
                    "Reclaimed idempotency key"
                );
                Ok(BeginOutcome::Proceed)
            }
        }
    }

    /// Marks a run as succeeded.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the update fails.
    pub async fn mark_succeeded(
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        handler_name: &str,
        message_id: Uuid,
    ) -> Result<(), IdempotencyError> {
        let now: DateTime<FixedOffset> = Utc::now().into();
        idempotency_keys::Entity::update_many()
            .col_expr(idempotency_keys::Column::Status, status_value(DbStatus::Succeeded))
            .col_expr(idempotency_keys::Column::LastError, Expr::value(Option::<String>::None))
            .col_expr(idempotency_keys::Column::UpdatedAt, Expr::value(now))
            .filter(key_filter(tenant_id, handler_name, message_id))
            .exec(txn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Records a failed run.
    ///
    /// Runs after the handler's transaction rolled back, so the row may not
    /// exist yet; it is upserted. A SUCCEEDED row is left alone.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the upsert fails.
    pub async fn mark_failed<C: ConnectionTrait>(
        conn: &C,
        tenant_id: TenantId,
        handler_name: &str,
        message_id: Uuid,
        error: &str,
    ) -> Result<(), IdempotencyError> {
        let now: DateTime<FixedOffset> = Utc::now().into();
        let row = idempotency_keys::ActiveModel {
            tenant_id: Set(tenant_id.into_inner()),
            handler_name: Set(handler_name.to_string()),
            message_id: Set(message_id),
            status: Set(DbStatus::Failed),
            last_error: Set(Some(error.to_string())),
            created_at: Set(now),
            updated_at: Set(now),
        };
        idempotency_keys::Entity::insert(row)
            .on_conflict(
                OnConflict::columns([
                    idempotency_keys::Column::TenantId,
                    idempotency_keys::Column::HandlerName,
                    idempotency_keys::Column::MessageId,
                ])
                .update_columns([
                    idempotency_keys::Column::Status,
                    idempotency_keys::Column::LastError,
                    idempotency_keys::Column::UpdatedAt,
                ])
                // a redelivery may have succeeded in the meantime
                .action_and_where(Expr::cust("idempotency_keys.status <> 'SUCCEEDED'"))
                .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(db_err)?;

        tracing::warn!(
            tenant_id = %tenant_id,
            handler = handler_name,
            message_id = %message_id,
            error,
            "Handler run failed"
        );
        Ok(())
    }

    /// Loads a key.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the query fails.
    pub async fn load<C: ConnectionTrait>(
        conn: &C,
        tenant_id: TenantId,
        handler_name: &str,
        message_id: Uuid,
    ) -> Result<Option<IdempotencyRecord>, IdempotencyError> {
        Ok(idempotency_keys::Entity::find()
            .filter(key_filter(tenant_id, handler_name, message_id))
            .one(conn)
            .await
            .map_err(db_err)?
            .map(record_from_model))
    }
}
