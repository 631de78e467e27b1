//! Stock movement repository: FIFO posting, deterministic rebuild and
//! movement reversal on PostgreSQL.
//!
//! Every key is handled under its `inv_rebuild:*` lock. Movements are never
//! deleted and their identity columns never change; a rebuild rewrites only
//! the derived cache columns and appends allocation rows. When a transfer
//! issue's cost moves, its receipt in the destination warehouse is re-costed
//! at the same unit cost.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

use tally_core::events::{DocumentRef, TransferDirection};
use tally_core::inventory::{
    CostPeg, InventoryError, MovementKind, MovementRevision, NewMovement, NewValuation, StockKey,
    StockMovement, StockValuation, cancel_valuation_rows, check_non_negative, needs_recompute,
    plan_valuation_rows, replay, stored_allocations,
};
use tally_core::lock::{LockManager, LockScope};
use tally_core::valuation::DocumentDeltas;
use tally_shared::types::{
    AccountId, MovementId, ProductId, StockValuationId, TenantId, WarehouseId,
};

use crate::entities::sea_orm_active_enums::{
    MovementKind as DbMovementKind, ProductType as DbProductType, ReferenceType,
};
use crate::entities::{stock_movements, stock_valuations};

fn db_err(e: sea_orm::DbErr) -> InventoryError {
    InventoryError::Database(e.to_string())
}

fn kind_columns(kind: MovementKind) -> (DbMovementKind, Option<Decimal>, Option<Decimal>) {
    match kind {
        MovementKind::Receipt => (DbMovementKind::Receipt, None, None),
        MovementKind::Issue => (DbMovementKind::Issue, None, None),
        MovementKind::Return { peg } => {
            let price = match peg {
                CostPeg::LastIncoming => None,
                CostPeg::Fixed(price) => Some(price),
            };
            (DbMovementKind::Return, price, None)
        }
        MovementKind::ValueAdjustment { new_value } => {
            (DbMovementKind::ValueAdjustment, None, Some(new_value))
        }
    }
}

pub(crate) fn movement_from_model(
    model: stock_movements::Model,
) -> Result<StockMovement, InventoryError> {
    let kind = match model.kind {
        DbMovementKind::Receipt => MovementKind::Receipt,
        DbMovementKind::Issue => MovementKind::Issue,
        DbMovementKind::Return => MovementKind::Return {
            peg: model.peg_price.map_or(CostPeg::LastIncoming, CostPeg::Fixed),
        },
        DbMovementKind::ValueAdjustment => MovementKind::ValueAdjustment {
            new_value: model.adjusted_value.ok_or_else(|| {
                InventoryError::MalformedScope(format!(
                    "value adjustment {} has no adjusted value",
                    model.id
                ))
            })?,
        },
    };

    Ok(StockMovement {
        id: MovementId::from_uuid(model.id),
        key: StockKey {
            tenant_id: TenantId::from_uuid(model.tenant_id),
            warehouse_id: WarehouseId::from_uuid(model.warehouse_id),
            product_id: ProductId::from_uuid(model.product_id),
            product_type: model.product_type.into(),
            batch: model.batch,
        },
        sequence_no: model.sequence_no,
        stock_date: model.stock_date.with_timezone(&Utc),
        kind,
        quantity: model.quantity,
        unit_cost: model.unit_cost,
        cumulative_incoming_qty: model.cumulative_incoming_qty,
        cumulative_outgoing_qty: model.cumulative_outgoing_qty,
        closing_qty: model.closing_qty,
        closing_value: model.closing_value,
        cost_amount: model.cost_amount,
        reference: DocumentRef::new(model.reference_type.into(), model.reference_id),
        reference_detail_id: model.reference_detail_id,
        inventory_account_id: AccountId::from_uuid(model.inventory_account_id),
        counter_account_id: AccountId::from_uuid(model.counter_account_id),
        is_reversal: model.is_reversal,
        reverses_movement_id: model.reverses_movement_id.map(MovementId::from_uuid),
        reversed_by_movement_id: model.reversed_by_movement_id.map(MovementId::from_uuid),
    })
}

pub(crate) fn valuation_from_model(model: stock_valuations::Model) -> StockValuation {
    StockValuation {
        id: StockValuationId::from_uuid(model.id),
        tenant_id: TenantId::from_uuid(model.tenant_id),
        movement_id: MovementId::from_uuid(model.movement_id),
        layer_movement_id: MovementId::from_uuid(model.layer_movement_id),
        qty: model.qty,
        unit_cost: model.unit_cost,
        amount: model.amount,
        reference: DocumentRef::new(model.reference_type.into(), model.reference_id),
        is_reversal: model.is_reversal,
        reverses_valuation_id: model.reverses_valuation_id.map(StockValuationId::from_uuid),
        reversed_by_valuation_id: model.reversed_by_valuation_id.map(StockValuationId::from_uuid),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

/// A freshly posted movement before costing fills its caches.
fn pending_movement(id: MovementId, sequence_no: i64, new: &NewMovement) -> StockMovement {
    let unit_cost = match new.kind {
        MovementKind::Receipt => new.unit_cost,
        MovementKind::Issue | MovementKind::Return { .. } | MovementKind::ValueAdjustment { .. } => {
            Decimal::ZERO
        }
    };
    StockMovement {
        id,
        key: new.key.clone(),
        sequence_no,
        stock_date: new.stock_date,
        kind: new.kind,
        quantity: new.signed_quantity(),
        unit_cost,
        cumulative_incoming_qty: Decimal::ZERO,
        cumulative_outgoing_qty: Decimal::ZERO,
        closing_qty: Decimal::ZERO,
        closing_value: Decimal::ZERO,
        cost_amount: Decimal::ZERO,
        reference: new.reference,
        reference_detail_id: new.reference_detail_id,
        inventory_account_id: new.inventory_account_id,
        counter_account_id: new.counter_account_id,
        is_reversal: false,
        reverses_movement_id: None,
        reversed_by_movement_id: None,
    }
}

async fn insert_movement(
    txn: &DatabaseTransaction,
    movement: &StockMovement,
) -> Result<(), InventoryError> {
    let (kind, peg_price, adjusted_value) = kind_columns(movement.kind);
    let model = stock_movements::ActiveModel {
        id: Set(movement.id.into_inner()),
        tenant_id: Set(movement.key.tenant_id.into_inner()),
        warehouse_id: Set(movement.key.warehouse_id.into_inner()),
        product_id: Set(movement.key.product_id.into_inner()),
        product_type: Set(movement.key.product_type.into()),
        batch: Set(movement.key.batch.clone()),
        sequence_no: Set(movement.sequence_no),
        stock_date: Set(movement.stock_date.into()),
        kind: Set(kind),
        quantity: Set(movement.quantity),
        unit_cost: Set(movement.unit_cost),
        peg_price: Set(peg_price),
        adjusted_value: Set(adjusted_value),
        cumulative_incoming_qty: Set(movement.cumulative_incoming_qty),
        cumulative_outgoing_qty: Set(movement.cumulative_outgoing_qty),
        closing_qty: Set(movement.closing_qty),
        closing_value: Set(movement.closing_value),
        cost_amount: Set(movement.cost_amount),
        reference_type: Set(movement.reference.kind.into()),
        reference_id: Set(movement.reference.id),
        reference_detail_id: Set(movement.reference_detail_id),
        inventory_account_id: Set(movement.inventory_account_id.into_inner()),
        counter_account_id: Set(movement.counter_account_id.into_inner()),
        is_reversal: Set(movement.is_reversal),
        reverses_movement_id: Set(movement.reverses_movement_id.map(MovementId::into_inner)),
        reversed_by_movement_id: Set(None),
        created_at: Set(Utc::now().into()),
    };
    stock_movements::Entity::insert(model)
        .exec_without_returning(txn)
        .await
        .map_err(db_err)?;
    Ok(())
}

async fn write_revision(
    txn: &DatabaseTransaction,
    revision: &MovementRevision,
) -> Result<(), InventoryError> {
    stock_movements::Entity::update_many()
        .col_expr(stock_movements::Column::UnitCost, Expr::value(revision.unit_cost))
        .col_expr(
            stock_movements::Column::CumulativeIncomingQty,
            Expr::value(revision.cumulative_incoming_qty),
        )
        .col_expr(
            stock_movements::Column::CumulativeOutgoingQty,
            Expr::value(revision.cumulative_outgoing_qty),
        )
        .col_expr(stock_movements::Column::ClosingQty, Expr::value(revision.closing_qty))
        .col_expr(stock_movements::Column::ClosingValue, Expr::value(revision.closing_value))
        .col_expr(stock_movements::Column::CostAmount, Expr::value(revision.cost_amount))
        .filter(stock_movements::Column::Id.eq(revision.movement_id.into_inner()))
        .exec(txn)
        .await
        .map_err(db_err)?;
    Ok(())
}

async fn append_valuations(
    txn: &DatabaseTransaction,
    tenant_id: TenantId,
    rows: &[NewValuation],
) -> Result<(), InventoryError> {
    let now: DateTime<FixedOffset> = Utc::now().into();
    for row in rows {
        let id = StockValuationId::new();
        let model = stock_valuations::ActiveModel {
            id: Set(id.into_inner()),
            tenant_id: Set(tenant_id.into_inner()),
            movement_id: Set(row.movement_id.into_inner()),
            layer_movement_id: Set(row.layer_movement_id.into_inner()),
            qty: Set(row.qty),
            unit_cost: Set(row.unit_cost),
            amount: Set(row.amount),
            reference_type: Set(row.reference.kind.into()),
            reference_id: Set(row.reference.id),
            is_reversal: Set(row.is_reversal()),
            reverses_valuation_id: Set(row.reverses.map(StockValuationId::into_inner)),
            reversed_by_valuation_id: Set(None),
            created_at: Set(now),
        };
        stock_valuations::Entity::insert(model)
            .exec_without_returning(txn)
            .await
            .map_err(db_err)?;

        if let Some(cancelled) = row.reverses {
            stock_valuations::Entity::update_many()
                .col_expr(
                    stock_valuations::Column::ReversedByValuationId,
                    Expr::value(id.into_inner()),
                )
                .filter(stock_valuations::Column::Id.eq(cancelled.into_inner()))
                .filter(stock_valuations::Column::ReversedByValuationId.is_null())
                .exec(txn)
                .await
                .map_err(db_err)?;
        }
    }
    Ok(())
}

async fn active_valuations<C: ConnectionTrait>(
    conn: &C,
    tenant_id: TenantId,
    movement_ids: &[MovementId],
) -> Result<Vec<StockValuation>, InventoryError> {
    if movement_ids.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = movement_ids.iter().map(|id| id.into_inner()).collect();
    Ok(stock_valuations::Entity::find()
        .filter(stock_valuations::Column::TenantId.eq(tenant_id.into_inner()))
        .filter(stock_valuations::Column::MovementId.is_in(ids))
        .filter(stock_valuations::Column::IsReversal.eq(false))
        .filter(stock_valuations::Column::ReversedByValuationId.is_null())
        .order_by_asc(stock_valuations::Column::CreatedAt)
        .all(conn)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(valuation_from_model)
        .collect())
}

async fn write_unit_cost(
    txn: &DatabaseTransaction,
    movement_id: MovementId,
    unit_cost: Decimal,
) -> Result<(), InventoryError> {
    stock_movements::Entity::update_many()
        .col_expr(stock_movements::Column::UnitCost, Expr::value(unit_cost))
        .filter(stock_movements::Column::Id.eq(movement_id.into_inner()))
        .exec(txn)
        .await
        .map_err(db_err)?;
    Ok(())
}

fn key_filter(key: &StockKey) -> Condition {
    Condition::all()
        .add(stock_movements::Column::TenantId.eq(key.tenant_id.into_inner()))
        .add(stock_movements::Column::WarehouseId.eq(key.warehouse_id.into_inner()))
        .add(stock_movements::Column::ProductId.eq(key.product_id.into_inner()))
        .add(stock_movements::Column::ProductType.eq(DbProductType::from(key.product_type)))
        .add(stock_movements::Column::Batch.eq(key.batch.clone()))
}

/// Loads every row of a key, reversed ones included, in costing order.
///
/// # Errors
///
/// Returns `Database` if the query fails, or `MalformedScope` for a
/// corrupt row.
pub async fn load_history<C: ConnectionTrait>(
    conn: &C,
    key: &StockKey,
) -> Result<Vec<StockMovement>, InventoryError> {
    stock_movements::Entity::find()
        .filter(key_filter(key))
        .order_by_asc(stock_movements::Column::StockDate)
        .order_by_asc(stock_movements::Column::SequenceNo)
        .all(conn)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(movement_from_model)
        .collect()
}

/// Stock date of the oldest active movement of a key.
///
/// # Errors
///
/// Returns `Database` if the query fails.
pub async fn earliest_active_date<C: ConnectionTrait>(
    conn: &C,
    key: &StockKey,
) -> Result<Option<DateTime<Utc>>, InventoryError> {
    Ok(stock_movements::Entity::find()
        .filter(key_filter(key))
        .filter(stock_movements::Column::IsReversal.eq(false))
        .filter(stock_movements::Column::ReversedByMovementId.is_null())
        .order_by_asc(stock_movements::Column::StockDate)
        .one(conn)
        .await
        .map_err(db_err)?
        .map(|m| m.stock_date.with_timezone(&Utc)))
}

/// Active movements of a document.
///
/// # Errors
///
/// Returns `Database` if the query fails.
pub async fn active_document_movements<C: ConnectionTrait>(
    conn: &C,
    tenant_id: TenantId,
    document: DocumentRef,
) -> Result<Vec<StockMovement>, InventoryError> {
    stock_movements::Entity::find()
        .filter(stock_movements::Column::TenantId.eq(tenant_id.into_inner()))
        .filter(stock_movements::Column::ReferenceType.eq(ReferenceType::from(document.kind)))
        .filter(stock_movements::Column::ReferenceId.eq(document.id))
        .filter(stock_movements::Column::IsReversal.eq(false))
        .filter(stock_movements::Column::ReversedByMovementId.is_null())
        .order_by_asc(stock_movements::Column::StockDate)
        .order_by_asc(stock_movements::Column::SequenceNo)
        .all(conn)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(movement_from_model)
        .collect()
}

fn next_sequence(history: &[StockMovement]) -> i64 {
    history.iter().map(|m| m.sequence_no).max().unwrap_or(0) + 1
}

/// Result of re-costing one key.
#[derive(Debug, Default)]
struct Rebuilt {
    deltas: DocumentDeltas,
    /// Active transfer issues inside the replayed window.
    transfers: Vec<StockMovement>,
}

/// FIFO posting and rebuild on one transaction.
///
/// Transaction-scoped lock backends hold each key's lock until the
/// transaction ends; in-process backends release it when the key is done.
#[derive(Debug)]
pub struct InventoryRepository<'l, L> {
    locks: &'l L,
    lock_timeout: Duration,
}

impl<'l, L> InventoryRepository<'l, L>
where
    L: LockManager<DatabaseTransaction>,
{
    /// Creates a repository using `locks` for the rebuild locks.
    #[must_use]
    pub const fn new(locks: &'l L, lock_timeout: Duration) -> Self {
        Self {
            locks,
            lock_timeout,
        }
    }

    async fn lock_key(
        &self,
        txn: &DatabaseTransaction,
        key: &StockKey,
    ) -> Result<L::Guard, InventoryError> {
        Ok(self
            .locks
            .acquire(txn, &LockScope::Rebuild(key.clone()), self.lock_timeout)
            .await?)
    }

    /// Records movements and costs them.
    ///
    /// Each key is replayed from the earliest new stock date, so backdated
    /// rows re-cost everything after them. The returned deltas cover every
    /// document whose cost changed, the posting document included.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuantity` or `MalformedScope` for bad input,
    /// `InsufficientLayers` when demand exceeds supply, `NegativeStock`
    /// when the guard trips, `Lock` when a key stays locked.
    pub async fn post_movements(
        &self,
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        movements: &[NewMovement],
    ) -> Result<DocumentDeltas, InventoryError> {
        let mut by_key: BTreeMap<&StockKey, Vec<&NewMovement>> = BTreeMap::new();
        for movement in movements {
            movement.validate()?;
            if movement.key.tenant_id != tenant_id {
                return Err(InventoryError::MalformedScope(format!(
                    "movement for {} posted under tenant {tenant_id}",
                    movement.key.lock_name()
                )));
            }
            by_key.entry(&movement.key).or_default().push(movement);
        }

        let mut deltas = DocumentDeltas::new();
        let mut transfers = Vec::new();
        for (key, batch) in by_key {
            let _guard = self.lock_key(txn, key).await?;
            let mut history = load_history(txn, key).await?;
            let mut sequence_no = next_sequence(&history);
            let mut from: Option<DateTime<Utc>> = None;

            for new in batch {
                if let Some(reason) = needs_recompute(&history, new.stock_date, sequence_no) {
                    tracing::info!(
                        key = %key.lock_name(),
                        stock_date = %new.stock_date,
                        reference = %new.reference,
                        ?reason,
                        "Backdated movement triggers recompute"
                    );
                }
                let movement = pending_movement(MovementId::new(), sequence_no, new);
                insert_movement(txn, &movement).await?;
                from = Some(from.map_or(movement.stock_date, |f| f.min(movement.stock_date)));
                history.push(movement);
                sequence_no += 1;
            }

            let rebuilt = self.rebuild_loaded(txn, key, &mut history, from).await?;
            deltas.merge(rebuilt.deltas);
            transfers.extend(rebuilt.transfers);
        }
        self.settle_transfers(txn, transfers, &mut deltas).await?;
        Ok(deltas)
    }

    /// Rebuilds one key from `from` (or from its first row).
    ///
    /// Caches are rewritten, changed draws are cancelled and re-appended,
    /// and the per-document deltas are returned for reposting.
    ///
    /// # Errors
    ///
    /// Same as [`Self::post_movements`].
    pub async fn rebuild_scope(
        &self,
        txn: &DatabaseTransaction,
        key: &StockKey,
        from: Option<DateTime<Utc>>,
    ) -> Result<DocumentDeltas, InventoryError> {
        let rebuilt = {
            let _guard = self.lock_key(txn, key).await?;
            let mut history = load_history(txn, key).await?;
            self.rebuild_loaded(txn, key, &mut history, from).await?
        };
        let mut deltas = rebuilt.deltas;
        self.settle_transfers(txn, rebuilt.transfers, &mut deltas).await?;
        Ok(deltas)
    }

    /// Reverses every active movement of a document and rebuilds the keys
    /// they belonged to.
    ///
    /// The returned deltas cover the other documents whose cost changed.
    ///
    /// # Errors
    ///
    /// Same as [`Self::post_movements`].
    pub async fn reverse_document(
        &self,
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        document: DocumentRef,
    ) -> Result<DocumentDeltas, InventoryError> {
        let mut by_key: BTreeMap<StockKey, HashSet<MovementId>> = BTreeMap::new();
        for movement in active_document_movements(txn, tenant_id, document).await? {
            by_key.entry(movement.key).or_default().insert(movement.id);
        }

        let mut deltas = DocumentDeltas::new();
        let mut transfers = Vec::new();
        for (key, reversed) in by_key {
            let _guard = self.lock_key(txn, &key).await?;
            let mut history = load_history(txn, &key).await?;
            let mut sequence_no = next_sequence(&history);

            let reversed_ids: Vec<MovementId> = reversed.iter().copied().collect();
            let draws = active_valuations(txn, tenant_id, &reversed_ids).await?;
            append_valuations(txn, tenant_id, &cancel_valuation_rows(&draws, &reversed)).await?;

            let mut reversals = Vec::with_capacity(reversed.len());
            let mut from: Option<DateTime<Utc>> = None;
            for original in history.iter_mut().filter(|m| reversed.contains(&m.id)) {
                let reversal = original.reversal(MovementId::new(), sequence_no);
                sequence_no += 1;
                insert_movement(txn, &reversal).await?;

                let stamped = stock_movements::Entity::update_many()
                    .col_expr(
                        stock_movements::Column::ReversedByMovementId,
                        Expr::value(reversal.id.into_inner()),
                    )
                    .filter(stock_movements::Column::Id.eq(original.id.into_inner()))
                    .filter(stock_movements::Column::ReversedByMovementId.is_null())
                    .exec(txn)
                    .await
                    .map_err(db_err)?;
                if stamped.rows_affected != 1 {
                    return Err(InventoryError::MovementNotFound(original.id));
                }

                original.reversed_by_movement_id = Some(reversal.id);
                from = Some(from.map_or(original.stock_date, |f| f.min(original.stock_date)));
                reversals.push(reversal);
            }
            history.extend(reversals);

            tracing::info!(
                tenant_id = %tenant_id,
                reference = %document,
                key = %key.lock_name(),
                reversed = reversed.len(),
                "Reversed stock movements"
            );

            let rebuilt = self.rebuild_loaded(txn, &key, &mut history, from).await?;
            deltas.merge(rebuilt.deltas);
            transfers.extend(rebuilt.transfers);
        }
        self.settle_transfers(txn, transfers, &mut deltas).await?;
        Ok(deltas)
    }

    /// Carries each transfer issue's unit cost onto its receiving leg and
    /// re-costs the receiving key from the receipt on.
    ///
    /// Receiving keys may hold transfer issues of their own, so settling
    /// runs until no receipt is left behind its issue.
    async fn settle_transfers(
        &self,
        txn: &DatabaseTransaction,
        mut pending: Vec<StockMovement>,
        deltas: &mut DocumentDeltas,
    ) -> Result<(), InventoryError> {
        let mut settled: HashSet<(MovementId, Decimal)> = HashSet::new();
        while let Some(queued) = pending.pop() {
            let legs =
                active_document_movements(txn, queued.key.tenant_id, queued.reference).await?;
            // costs are read back, a later rebuild may have moved them
            let Some(issue) = legs.iter().find(|m| m.id == queued.id) else {
                continue;
            };
            for receipt in legs.iter().filter(|m| m.receives_transfer(issue)) {
                if receipt.unit_cost == issue.unit_cost
                    || !settled.insert((receipt.id, issue.unit_cost))
                {
                    continue;
                }

                let key = &receipt.key;
                let _guard = self.lock_key(txn, key).await?;
                write_unit_cost(txn, receipt.id, issue.unit_cost).await?;
                tracing::info!(
                    key = %key.lock_name(),
                    reference = %issue.reference,
                    previous = %receipt.unit_cost,
                    unit_cost = %issue.unit_cost,
                    "Transfer receipt takes issue cost"
                );

                let mut history = load_history(txn, key).await?;
                let rebuilt = self
                    .rebuild_loaded(txn, key, &mut history, Some(receipt.stock_date))
                    .await?;
                deltas.merge(rebuilt.deltas);
                pending.extend(rebuilt.transfers);
            }
        }
        Ok(())
    }

    async fn rebuild_loaded(
        &self,
        txn: &DatabaseTransaction,
        key: &StockKey,
        history: &mut [StockMovement],
        from: Option<DateTime<Utc>>,
    ) -> Result<Rebuilt, InventoryError> {
        let outgoing: Vec<MovementId> = history
            .iter()
            .filter(|m| m.is_active() && m.is_outgoing())
            .map(|m| m.id)
            .collect();
        let draws = active_valuations(txn, key.tenant_id, &outgoing).await?;
        let outcome = replay(key, history, from, &stored_allocations(&draws))?;

        for revision in &outcome.revisions {
            write_revision(txn, revision).await?;
        }

        let documents: HashMap<MovementId, DocumentRef> =
            history.iter().map(|m| (m.id, m.reference)).collect();
        let rows = plan_valuation_rows(&outcome.revisions, &draws, &documents);
        append_valuations(txn, key.tenant_id, &rows).await?;

        let revised: HashMap<MovementId, &MovementRevision> =
            outcome.revisions.iter().map(|r| (r.movement_id, r)).collect();
        for movement in history.iter_mut() {
            if let Some(revision) = revised.get(&movement.id) {
                movement.apply_revision(revision);
            }
        }
        check_non_negative(history.iter())?;

        let transfers = history
            .iter()
            .filter(|m| m.is_active() && from.is_none_or(|from| m.stock_date >= from))
            .filter(|m| m.transfer_direction() == Some(TransferDirection::Out))
            .cloned()
            .collect();

        tracing::info!(
            key = %key.lock_name(),
            from = ?from,
            replayed = outcome.replayed,
            revised = outcome.revisions.len(),
            valuation_rows = rows.len(),
            documents = outcome.deltas.len(),
            "Rebuilt stock key"
        );
        Ok(Rebuilt {
            deltas: outcome.deltas,
            transfers,
        })
    }
}
