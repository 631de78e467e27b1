//! Journal repository: the append-only ledger protocol on PostgreSQL.
//!
//! Every function runs on the caller's transaction. Posted journals are never
//! updated apart from the reversal stamp, which the `protect_journal` trigger
//! enforces as well.

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, FromQueryResult, JoinType,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set,
};
use uuid::Uuid;

use tally_core::events::{DocumentRef, TransferDirection};
use tally_core::ledger::{
    BalanceRow, Journal, LedgerError, LedgerLine, NewJournal, ReversalPlan, plan_reversal,
    running_balances, validate_lines,
};
use tally_shared::types::{AccountId, BranchId, JournalId, LedgerLineId, TenantId};

use crate::entities::sea_orm_active_enums::ReferenceType;
use crate::entities::{journals, ledger_lines};

fn db_err(e: sea_orm::DbErr) -> LedgerError {
    LedgerError::Database(e.to_string())
}

fn line_from_model(model: ledger_lines::Model) -> LedgerLine {
    LedgerLine {
        id: LedgerLineId::from_uuid(model.id),
        journal_id: JournalId::from_uuid(model.journal_id),
        line_no: model.line_no,
        account_id: AccountId::from_uuid(model.account_id),
        base_debit: model.base_debit,
        base_credit: model.base_credit,
        foreign_debit: model.foreign_debit,
        foreign_credit: model.foreign_credit,
        foreign_currency: model.foreign_currency,
        exchange_rate: model.exchange_rate,
        is_inventory_valuation: model.is_inventory_valuation,
        is_transfer_in: model.is_transfer_in,
        bank_transaction_id: model.bank_transaction_id,
        realised_amount: model.realised_amount,
        closing_balance: model.closing_balance,
        description: model.description,
    }
}

fn journal_from_models(model: journals::Model, lines: Vec<ledger_lines::Model>) -> Journal {
    Journal {
        id: JournalId::from_uuid(model.id),
        tenant_id: TenantId::from_uuid(model.tenant_id),
        branch_id: model.branch_id.map(BranchId::from_uuid),
        reference: DocumentRef::new(model.reference_type.into(), model.reference_id),
        transaction_number: model.transaction_number,
        transaction_date_time: model.transaction_date_time.with_timezone(&Utc),
        lines: lines.into_iter().map(line_from_model).collect(),
        is_reversal: model.is_reversal,
        reverses_journal_id: model.reverses_journal_id.map(JournalId::from_uuid),
        reversed_by_journal_id: model.reversed_by_journal_id.map(JournalId::from_uuid),
        reversal_reason: model.reversal_reason,
        reversed_at: model.reversed_at.map(|at| at.with_timezone(&Utc)),
        created_at: model.created_at.with_timezone(&Utc),
    }
}

#[derive(Debug, FromQueryResult)]
struct OpeningRow {
    account_id: Uuid,
    balance: Decimal,
}

#[derive(Debug, FromQueryResult)]
struct LineRow {
    id: Uuid,
    account_id: Uuid,
    line_no: i32,
    base_debit: Decimal,
    base_credit: Decimal,
    closing_balance: Option<Decimal>,
    journal_date: DateTime<FixedOffset>,
    journal_created_at: DateTime<FixedOffset>,
}

/// Journal repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct JournalRepository;

impl JournalRepository {
    /// Persists a journal and its lines.
    ///
    /// # Errors
    ///
    /// Returns a validation error for an unbalanced or malformed journal
    /// before anything is written, or `Database` if an insert fails.
    pub async fn create(
        txn: &DatabaseTransaction,
        journal: &NewJournal,
    ) -> Result<Journal, LedgerError> {
        validate_lines(&journal.lines)?;

        let id = JournalId::new();
        let now: DateTime<FixedOffset> = Utc::now().into();

        let header = journals::ActiveModel {
            id: Set(id.into_inner()),
            tenant_id: Set(journal.tenant_id.into_inner()),
            branch_id: Set(journal.branch_id.map(BranchId::into_inner)),
            reference_type: Set(journal.reference.kind.into()),
            reference_id: Set(journal.reference.id),
            transaction_number: Set(journal.transaction_number.clone()),
            transaction_date_time: Set(journal.transaction_date_time.into()),
            is_reversal: Set(journal.is_reversal),
            reverses_journal_id: Set(journal.reverses_journal_id.map(JournalId::into_inner)),
            reversed_by_journal_id: Set(None),
            reversal_reason: Set(journal.reversal_reason.clone()),
            reversed_at: Set(None),
            created_at: Set(now),
        };
        let header = journals::Entity::insert(header)
            .exec_with_returning(txn)
            .await
            .map_err(db_err)?;

        let mut lines = Vec::with_capacity(journal.lines.len());
        for (no, line) in (1..).zip(&journal.lines) {
            let model = ledger_lines::ActiveModel {
                id: Set(Uuid::now_v7()),
                journal_id: Set(id.into_inner()),
                tenant_id: Set(journal.tenant_id.into_inner()),
                line_no: Set(no),
                account_id: Set(line.account_id.into_inner()),
                base_debit: Set(line.base_debit),
                base_credit: Set(line.base_credit),
                foreign_debit: Set(line.foreign_debit),
                foreign_credit: Set(line.foreign_credit),
                foreign_currency: Set(line.foreign_currency.clone()),
                exchange_rate: Set(line.exchange_rate),
                is_inventory_valuation: Set(line.is_inventory_valuation),
                is_transfer_in: Set(line.is_transfer_in),
                bank_transaction_id: Set(line.bank_transaction_id),
                realised_amount: Set(line.realised_amount),
                closing_balance: Set(None),
                description: Set(line.description.clone()),
                created_at: Set(now),
            };
            lines.push(
                ledger_lines::Entity::insert(model)
                    .exec_with_returning(txn)
                    .await
                    .map_err(db_err)?,
            );
        }

        tracing::debug!(
            journal_id = %id,
            tenant_id = %journal.tenant_id,
            reference = %journal.reference,
            is_reversal = journal.is_reversal,
            lines = lines.len(),
            "Created journal"
        );

        Ok(journal_from_models(header, lines))
    }

    async fn lines_of<C: ConnectionTrait>(
        conn: &C,
        journal_id: Uuid,
    ) -> Result<Vec<ledger_lines::Model>, LedgerError> {
        ledger_lines::Entity::find()
            .filter(ledger_lines::Column::JournalId.eq(journal_id))
            .order_by_asc(ledger_lines::Column::LineNo)
            .all(conn)
            .await
            .map_err(db_err)
    }

    /// Loads a journal with its lines.
    ///
    /// # Errors
    ///
    /// Returns `JournalNotFound` if the tenant has no such journal.
    pub async fn load<C: ConnectionTrait>(
        conn: &C,
        tenant_id: TenantId,
        journal_id: JournalId,
    ) -> Result<Journal, LedgerError> {
        let header = journals::Entity::find_by_id(journal_id.into_inner())
            .filter(journals::Column::TenantId.eq(tenant_id.into_inner()))
            .one(conn)
            .await
            .map_err(db_err)?
            .ok_or(LedgerError::JournalNotFound(journal_id.into_inner()))?;
        let lines = Self::lines_of(conn, header.id).await?;
        Ok(journal_from_models(header, lines))
    }

    /// Every journal of a tenant with its lines, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the query fails.
    pub async fn load_tenant<C: ConnectionTrait>(
        conn: &C,
        tenant_id: TenantId,
    ) -> Result<Vec<Journal>, LedgerError> {
        let rows = journals::Entity::find()
            .filter(journals::Column::TenantId.eq(tenant_id.into_inner()))
            .order_by_asc(journals::Column::CreatedAt)
            .find_with_related(ledger_lines::Entity)
            .all(conn)
            .await
            .map_err(db_err)?;
        Ok(rows
            .into_iter()
            .map(|(header, mut lines)| {
                lines.sort_by_key(|l| l.line_no);
                journal_from_models(header, lines)
            })
            .collect())
    }

    /// All active journals of a document, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Database` if a query fails.
    pub async fn find_all_active<C: ConnectionTrait>(
        conn: &C,
        tenant_id: TenantId,
        document: DocumentRef,
    ) -> Result<Vec<Journal>, LedgerError> {
        let headers = journals::Entity::find()
            .filter(journals::Column::TenantId.eq(tenant_id.into_inner()))
            .filter(journals::Column::ReferenceType.eq(ReferenceType::from(document.kind)))
            .filter(journals::Column::ReferenceId.eq(document.id))
            .filter(journals::Column::IsReversal.eq(false))
            .filter(journals::Column::ReversedByJournalId.is_null())
            .order_by_desc(journals::Column::CreatedAt)
            .all(conn)
            .await
            .map_err(db_err)?;

        let mut active = Vec::with_capacity(headers.len());
        for header in headers {
            let lines = Self::lines_of(conn, header.id).await?;
            active.push(journal_from_models(header, lines));
        }
        Ok(active)
    }

    /// The most recent active journal of a document.
    ///
    /// With a direction, only journals whose lines belong to that transfer leg
    /// qualify.
    ///
    /// # Errors
    ///
    /// Returns `Database` if a query fails.
    pub async fn find_active<C: ConnectionTrait>(
        conn: &C,
        tenant_id: TenantId,
        document: DocumentRef,
        direction: Option<TransferDirection>,
    ) -> Result<Option<Journal>, LedgerError> {
        let active = Self::find_all_active(conn, tenant_id, document).await?;
        Ok(active
            .into_iter()
            .find(|j| direction.is_none_or(|d| j.has_direction(d))))
    }

    /// Reverses a journal and returns the reversal's id.
    ///
    /// Calling it again for an already reversed journal returns the existing
    /// reversal without writing anything.
    ///
    /// # Errors
    ///
    /// Returns `JournalNotFound`, `CannotReverseReversal`, or `Database`.
    pub async fn reverse(
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        journal_id: JournalId,
        reason: &str,
    ) -> Result<JournalId, LedgerError> {
        // row lock so concurrent reversals of one journal queue up
        journals::Entity::find_by_id(journal_id.into_inner())
            .filter(journals::Column::TenantId.eq(tenant_id.into_inner()))
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(db_err)?
            .ok_or(LedgerError::JournalNotFound(journal_id.into_inner()))?;

        let original = Self::load(txn, tenant_id, journal_id).await?;
        let reversal = match plan_reversal(&original, reason)? {
            ReversalPlan::AlreadyReversed(existing) => {
                tracing::debug!(
                    journal_id = %journal_id,
                    reversal_id = %existing,
                    "Journal already reversed"
                );
                return Ok(existing);
            }
            ReversalPlan::Reverse(reversal) => Self::create(txn, &reversal).await?,
        };

        let now: DateTime<FixedOffset> = Utc::now().into();
        let stamped = journals::Entity::update_many()
            .col_expr(
                journals::Column::ReversedByJournalId,
                Expr::value(reversal.id.into_inner()),
            )
            .col_expr(journals::Column::ReversedAt, Expr::value(now))
            .col_expr(journals::Column::ReversalReason, Expr::value(reason.to_string()))
            .filter(journals::Column::Id.eq(journal_id.into_inner()))
            .filter(journals::Column::ReversedByJournalId.is_null())
            .exec(txn)
            .await
            .map_err(db_err)?;
        if stamped.rows_affected != 1 {
            return Err(LedgerError::Database(format!(
                "journal {journal_id} was reversed concurrently"
            )));
        }

        tracing::info!(
            tenant_id = %tenant_id,
            journal_id = %journal_id,
            reversal_id = %reversal.id,
            reason,
            "Reversed journal"
        );
        Ok(reversal.id)
    }

    /// Reverses every active journal of a document.
    ///
    /// # Errors
    ///
    /// Propagates the first reversal failure.
    pub async fn reverse_document(
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        document: DocumentRef,
        reason: &str,
    ) -> Result<Vec<JournalId>, LedgerError> {
        let active = Self::find_all_active(txn, tenant_id, document).await?;
        let mut reversals = Vec::with_capacity(active.len());
        for journal in active {
            reversals.push(Self::reverse(txn, tenant_id, journal.id, reason).await?);
        }
        Ok(reversals)
    }

    /// Recomputes the closing balance cache of the given accounts for every
    /// line dated at or after `from`, returning how many lines changed.
    ///
    /// # Errors
    ///
    /// Returns `Database` if a query or update fails.
    pub async fn refresh_closing_balances(
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        accounts: &[AccountId],
        from: DateTime<Utc>,
    ) -> Result<usize, LedgerError> {
        if accounts.is_empty() {
            return Ok(0);
        }
        let account_ids: Vec<Uuid> = accounts.iter().map(|a| a.into_inner()).collect();
        let from: DateTime<FixedOffset> = from.into();

        let opening: HashMap<AccountId, Decimal> = ledger_lines::Entity::find()
            .select_only()
            .column(ledger_lines::Column::AccountId)
            .column_as(
                Expr::cust("COALESCE(SUM(ledger_lines.base_debit - ledger_lines.base_credit), 0)"),
                "balance",
            )
            .join(JoinType::InnerJoin, ledger_lines::Relation::Journals.def())
            .filter(ledger_lines::Column::TenantId.eq(tenant_id.into_inner()))
            .filter(ledger_lines::Column::AccountId.is_in(account_ids.clone()))
            .filter(journals::Column::TransactionDateTime.lt(from))
            .group_by(ledger_lines::Column::AccountId)
            .into_model::<OpeningRow>()
            .all(txn)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(|row| (AccountId::from_uuid(row.account_id), row.balance))
            .collect();

        let rows: Vec<LineRow> = ledger_lines::Entity::find()
            .select_only()
            .column(ledger_lines::Column::Id)
            .column(ledger_lines::Column::AccountId)
            .column(ledger_lines::Column::LineNo)
            .column(ledger_lines::Column::BaseDebit)
            .column(ledger_lines::Column::BaseCredit)
            .column(ledger_lines::Column::ClosingBalance)
            .column_as(journals::Column::TransactionDateTime, "journal_date")
            .column_as(journals::Column::CreatedAt, "journal_created_at")
            .join(JoinType::InnerJoin, ledger_lines::Relation::Journals.def())
            .filter(ledger_lines::Column::TenantId.eq(tenant_id.into_inner()))
            .filter(ledger_lines::Column::AccountId.is_in(account_ids))
            .filter(journals::Column::TransactionDateTime.gte(from))
            .into_model::<LineRow>()
            .all(txn)
            .await
            .map_err(db_err)?;

        let cached: HashMap<Uuid, Option<Decimal>> =
            rows.iter().map(|r| (r.id, r.closing_balance)).collect();
        let balance_rows = rows
            .into_iter()
            .map(|r| BalanceRow {
                line_id: LedgerLineId::from_uuid(r.id),
                account_id: AccountId::from_uuid(r.account_id),
                transaction_date_time: r.journal_date.with_timezone(&Utc),
                created_at: r.journal_created_at.with_timezone(&Utc),
                line_no: r.line_no,
                debit: r.base_debit,
                credit: r.base_credit,
            })
            .collect();

        let mut changed = 0;
        for (line_id, balance) in running_balances(&opening, balance_rows) {
            if cached.get(&line_id.into_inner()) == Some(&Some(balance)) {
                continue;
            }
            ledger_lines::Entity::update_many()
                .col_expr(ledger_lines::Column::ClosingBalance, Expr::value(balance))
                .filter(ledger_lines::Column::Id.eq(line_id.into_inner()))
                .exec(txn)
                .await
                .map_err(db_err)?;
            changed += 1;
        }

        tracing::debug!(
            tenant_id = %tenant_id,
            accounts = accounts.len(),
            changed,
            "Refreshed closing balances"
        );
        Ok(changed)
    }
}
