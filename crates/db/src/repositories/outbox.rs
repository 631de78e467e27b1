//! Outbox repository: enqueue, claim, and settle publish attempts.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::{Expr, LockBehavior, LockType, OnConflict, SimpleExpr};
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};

use tally_core::events::ChangeEvent;
use tally_core::outbox::{
    ClaimDecision, FailureOutcome, OutboxError, OutboxPolicy, OutboxRecord, PublishState,
};
use tally_shared::types::{OutboxRecordId, TenantId};

use crate::entities::outbox_records;
use crate::entities::sea_orm_active_enums::PublishState as DbPublishState;

fn db_err(e: sea_orm::DbErr) -> OutboxError {
    OutboxError::Database(e.to_string())
}

fn state_value(state: DbPublishState) -> SimpleExpr {
    outbox_records::Column::PublishState.save_as(Expr::val(state))
}

fn record_from_model(model: outbox_records::Model) -> OutboxRecord {
    OutboxRecord {
        id: OutboxRecordId::from_uuid(model.id),
        event: ChangeEvent {
            id: model.id,
            tenant_id: TenantId::from_uuid(model.tenant_id),
            reference_type: model.reference_type.into(),
            reference_id: model.reference_id,
            action: model.action.into(),
            old_object: model.old_object,
            new_object: model.new_object,
            transaction_date_time: model.transaction_date_time.with_timezone(&Utc),
            correlation_id: model.correlation_id,
        },
        is_processed: model.is_processed,
        state: model.publish_state.into(),
        attempts: model.attempts,
        locked_by: model.locked_by,
        locked_at: model.locked_at.map(|at| at.with_timezone(&Utc)),
        next_attempt_at: model.next_attempt_at.map(|at| at.with_timezone(&Utc)),
        last_error: model.last_error,
        transport_message_id: model.transport_message_id,
        created_at: model.created_at.with_timezone(&Utc),
    }
}

/// Records selected by one claim.
#[derive(Debug, Clone, Default)]
pub struct ClaimedBatch {
    /// Records now PROCESSING under this worker, ready to publish.
    pub dispatch: Vec<OutboxRecord>,
    /// Records moved to DEAD without publishing.
    pub dead_lettered: Vec<OutboxRecordId>,
}

/// Outbox repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct OutboxRepository;

impl OutboxRepository {
    /// Enqueues a change event as a PENDING record and returns the stored
    /// row.
    ///
    /// Enqueueing the same event id twice keeps the first record.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the insert fails.
    pub async fn enqueue<C: ConnectionTrait>(
        conn: &C,
        event: ChangeEvent,
    ) -> Result<OutboxRecord, OutboxError> {
        let now = Utc::now();
        let record = OutboxRecord::pending(event, now);
        let created_at: DateTime<FixedOffset> = record.created_at.into();

        let model = outbox_records::ActiveModel {
            id: Set(record.id.into_inner()),
            tenant_id: Set(record.event.tenant_id.into_inner()),
            reference_type: Set(record.event.reference_type.into()),
            reference_id: Set(record.event.reference_id),
            action: Set(record.event.action.into()),
            old_object: Set(record.event.old_object.clone()),
            new_object: Set(record.event.new_object.clone()),
            transaction_date_time: Set(record.event.transaction_date_time.into()),
            correlation_id: Set(record.event.correlation_id.clone()),
            is_processed: Set(false),
            publish_state: Set(DbPublishState::Pending),
            attempts: Set(0),
            locked_by: Set(None),
            locked_at: Set(None),
            next_attempt_at: Set(None),
            last_error: Set(None),
            transport_message_id: Set(None),
            created_at: Set(created_at),
            updated_at: Set(created_at),
        };
        let inserted = outbox_records::Entity::insert(model)
            .on_conflict(
                OnConflict::column(outbox_records::Column::Id)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(conn)
            .await
            .map_err(db_err)?;

        if inserted == 0 {
            tracing::debug!(record_id = %record.id, "Outbox record already enqueued");
        } else {
            tracing::debug!(
                record_id = %record.id,
                tenant_id = %record.event.tenant_id,
                reference_type = %record.event.reference_type,
                reference_id = %record.event.reference_id,
                "Enqueued outbox record"
            );
        }
        Self::load(conn, record.id).await
    }

    /// Loads a record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Database`.
    pub async fn load<C: ConnectionTrait>(
        conn: &C,
        id: OutboxRecordId,
    ) -> Result<OutboxRecord, OutboxError> {
        outbox_records::Entity::find_by_id(id.into_inner())
            .one(conn)
            .await
            .map_err(db_err)?
            .map(record_from_model)
            .ok_or(OutboxError::NotFound(id))
    }

    /// Marks the record as applied by the posting handler. Returns `false`
    /// when the event did not come through the outbox.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the update fails.
    pub async fn mark_processed<C: ConnectionTrait>(
        conn: &C,
        id: OutboxRecordId,
    ) -> Result<bool, OutboxError> {
        let now: DateTime<FixedOffset> = Utc::now().into();
        let updated = outbox_records::Entity::update_many()
            .col_expr(outbox_records::Column::IsProcessed, Expr::value(true))
            .col_expr(outbox_records::Column::UpdatedAt, Expr::value(now))
            .filter(outbox_records::Column::Id.eq(id.into_inner()))
            .exec(conn)
            .await
            .map_err(db_err)?;
        Ok(updated.rows_affected > 0)
    }

    /// Claims up to `limit` eligible records for `worker_id`.
    ///
    /// Selection and state changes commit in one transaction with
    /// `FOR UPDATE SKIP LOCKED`, so concurrent workers never claim the same
    /// record. Records out of attempts are dead-lettered instead.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the transaction fails.
    pub async fn claim_batch(
        db: &DatabaseConnection,
        policy: &OutboxPolicy,
        worker_id: &str,
        limit: u64,
    ) -> Result<ClaimedBatch, OutboxError> {
        let now = Utc::now();
        let now_tz: DateTime<FixedOffset> = now.into();
        let lock_timeout = chrono::Duration::from_std(policy.lock_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let stale_before: DateTime<FixedOffset> = (now - lock_timeout).into();

        let due = Condition::all()
            .add(
                outbox_records::Column::PublishState
                    .is_in([DbPublishState::Pending, DbPublishState::Failed]),
            )
            .add(
                Condition::any()
                    .add(outbox_records::Column::NextAttemptAt.is_null())
                    .add(outbox_records::Column::NextAttemptAt.lte(now_tz)),
            );
        let abandoned = Condition::all()
            .add(outbox_records::Column::PublishState.eq(DbPublishState::Processing))
            .add(
                Condition::any()
                    .add(outbox_records::Column::LockedAt.is_null())
                    .add(outbox_records::Column::LockedAt.lte(stale_before)),
            );

        let txn = db.begin().await.map_err(db_err)?;
        let rows = outbox_records::Entity::find()
            .filter(Condition::any().add(due).add(abandoned))
            .order_by_asc(outbox_records::Column::CreatedAt)
            .limit(limit)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&txn)
            .await
            .map_err(db_err)?;

        let mut batch = ClaimedBatch::default();
        for model in rows {
            let mut record = record_from_model(model);
            match policy.claim_decision(record.attempts) {
                ClaimDecision::DeadLetter => {
                    outbox_records::Entity::update_many()
                        .col_expr(
                            outbox_records::Column::PublishState,
                            state_value(DbPublishState::Dead),
                        )
                        .col_expr(
                            outbox_records::Column::LockedBy,
                            Expr::value(Option::<String>::None),
                        )
                        .col_expr(outbox_records::Column::UpdatedAt, Expr::value(now_tz))
                        .filter(outbox_records::Column::Id.eq(record.id.into_inner()))
                        .exec(&txn)
                        .await
                        .map_err(db_err)?;
                    tracing::error!(
                        record_id = %record.id,
                        tenant_id = %record.event.tenant_id,
                        attempts = record.attempts,
                        last_error = record.last_error.as_deref().unwrap_or_default(),
                        "Outbox record dead-lettered, attempts exhausted"
                    );
                    batch.dead_lettered.push(record.id);
                }
                ClaimDecision::Dispatch => {
                    if record.state == PublishState::Processing {
                        tracing::warn!(
                            record_id = %record.id,
                            previous_holder = record.locked_by.as_deref().unwrap_or_default(),
                            "Reclaiming abandoned outbox claim"
                        );
                    }
                    outbox_records::Entity::update_many()
                        .col_expr(
                            outbox_records::Column::PublishState,
                            state_value(DbPublishState::Processing),
                        )
                        .col_expr(outbox_records::Column::LockedBy, Expr::value(worker_id))
                        .col_expr(outbox_records::Column::LockedAt, Expr::value(now_tz))
                        .col_expr(
                            outbox_records::Column::Attempts,
                            Expr::col(outbox_records::Column::Attempts).add(1),
                        )
                        .col_expr(outbox_records::Column::UpdatedAt, Expr::value(now_tz))
                        .filter(outbox_records::Column::Id.eq(record.id.into_inner()))
                        .exec(&txn)
                        .await
                        .map_err(db_err)?;

                    record.state = PublishState::Processing;
                    record.locked_by = Some(worker_id.to_string());
                    record.locked_at = Some(now);
                    record.attempts += 1;
                    batch.dispatch.push(record);
                }
            }
        }
        txn.commit().await.map_err(db_err)?;

        if !batch.dispatch.is_empty() || !batch.dead_lettered.is_empty() {
            tracing::debug!(
                worker_id,
                claimed = batch.dispatch.len(),
                dead_lettered = batch.dead_lettered.len(),
                "Claimed outbox batch"
            );
        }
        Ok(batch)
    }

    /// Records a successful publish.
    ///
    /// # Errors
    ///
    /// Returns `NotHeld` if the claim moved to another worker.
    pub async fn mark_sent<C: ConnectionTrait>(
        conn: &C,
        id: OutboxRecordId,
        worker_id: &str,
        transport_message_id: &str,
    ) -> Result<(), OutboxError> {
        let now: DateTime<FixedOffset> = Utc::now().into();
        let updated = outbox_records::Entity::update_many()
            .col_expr(outbox_records::Column::PublishState, state_value(DbPublishState::Sent))
            .col_expr(
                outbox_records::Column::TransportMessageId,
                Expr::value(transport_message_id),
            )
            .col_expr(outbox_records::Column::LastError, Expr::value(Option::<String>::None))
            .col_expr(outbox_records::Column::LockedBy, Expr::value(Option::<String>::None))
            .col_expr(outbox_records::Column::UpdatedAt, Expr::value(now))
            .filter(Self::held_by(id, worker_id))
            .exec(conn)
            .await
            .map_err(db_err)?;
        if updated.rows_affected == 0 {
            return Err(OutboxError::NotHeld {
                id,
                worker_id: worker_id.to_string(),
            });
        }
        tracing::debug!(record_id = %id, transport_message_id, "Outbox record sent");
        Ok(())
    }

    /// Records a failed publish: FAILED with backoff, or DEAD once the
    /// attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns `NotHeld` if the claim moved to another worker.
    pub async fn mark_failed<C: ConnectionTrait>(
        conn: &C,
        policy: &OutboxPolicy,
        record: &OutboxRecord,
        worker_id: &str,
        error: &str,
    ) -> Result<FailureOutcome, OutboxError> {
        let now = Utc::now();
        let now_tz: DateTime<FixedOffset> = now.into();
        let outcome = policy.on_failure(record.attempts, now);

        let (state, next_attempt_at) = match outcome {
            FailureOutcome::Retry { next_attempt_at } => {
                let at: DateTime<FixedOffset> = next_attempt_at.into();
                (DbPublishState::Failed, Some(at))
            }
            FailureOutcome::Dead => (DbPublishState::Dead, None),
        };
        let updated = outbox_records::Entity::update_many()
            .col_expr(outbox_records::Column::PublishState, state_value(state))
            .col_expr(outbox_records::Column::NextAttemptAt, Expr::value(next_attempt_at))
            .col_expr(outbox_records::Column::LastError, Expr::value(error))
            .col_expr(outbox_records::Column::LockedBy, Expr::value(Option::<String>::None))
            .col_expr(outbox_records::Column::UpdatedAt, Expr::value(now_tz))
            .filter(Self::held_by(record.id, worker_id))
            .exec(conn)
            .await
            .map_err(db_err)?;
        if updated.rows_affected == 0 {
            return Err(OutboxError::NotHeld {
                id: record.id,
                worker_id: worker_id.to_string(),
            });
        }

        match outcome {
            FailureOutcome::Retry { next_attempt_at } => tracing::warn!(
                record_id = %record.id,
                attempt = record.attempts,
                %next_attempt_at,
                error,
                "Outbox publish failed, retry scheduled"
            ),
            FailureOutcome::Dead => tracing::error!(
                record_id = %record.id,
                tenant_id = %record.event.tenant_id,
                attempt = record.attempts,
                error,
                "Outbox publish failed, record dead-lettered"
            ),
        }
        Ok(outcome)
    }

    fn held_by(id: OutboxRecordId, worker_id: &str) -> Condition {
        Condition::all()
            .add(outbox_records::Column::Id.eq(id.into_inner()))
            .add(outbox_records::Column::PublishState.eq(DbPublishState::Processing))
            .add(outbox_records::Column::LockedBy.eq(worker_id))
    }
}
