//! Posting service: applies one change event to the ledger and stock tables.
//!
//! The idempotency key is claimed and committed first, so duplicates are
//! skipped and deliveries racing a live run fail fast with `InProgress`. The
//! work itself runs in a single tenant-scoped transaction:
//!
//! 1. take the tenant's posting lock
//! 2. plan through the [`DocumentTranslator`]
//! 3. reverse what the document had active, post its movements and journals
//! 4. repost every other document whose FIFO cost moved
//! 5. refresh closing balances, mark the key and outbox record, commit
//!
//! A FIFO shortfall triggers one rebuild of the short key followed by a
//! single retry under the same claim.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait};
use thiserror::Error;

use tally_core::events::{ChangeEvent, DocumentRef};
use tally_core::idempotency::{BeginOutcome, IdempotencyError};
use tally_core::inventory::{InventoryError, NewMovement, StockKey};
use tally_core::ledger::{Journal, LedgerError, NewJournal};
use tally_core::lock::{LockError, LockManager, LockScope};
use tally_core::outbox::OutboxError;
use tally_core::posting::{
    DocumentTranslator, PostingPlan, TranslateError, journal_direction, plan_for,
};
use tally_core::valuation::{DocumentDeltas, apply_deltas};
use tally_shared::config::LockConfig;
use tally_shared::error::AppError;
use tally_shared::types::{AccountId, JournalId, OutboxRecordId, TenantId};

use crate::locks::PgAdvisoryLocks;
use crate::repositories::{
    IdempotencyRepository, InventoryRepository, JournalRepository, OutboxRepository,
    RepostRepository, Reposted, earliest_active_date,
};
use crate::rls::RlsConnection;

/// Errors raised while posting an event.
#[derive(Debug, Error)]
pub enum PostingError {
    /// Ledger rule or storage failure.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// FIFO costing failure.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// Posting lock not acquired in time.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Duplicate delivery still in flight.
    #[error(transparent)]
    Idempotency(#[from] IdempotencyError),

    /// The translator rejected the event.
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// Outbox bookkeeping failed.
    #[error(transparent)]
    Outbox(#[from] OutboxError),

    /// Transaction control failed.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl PostingError {
    /// Returns the error code for logs and idempotency records.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Ledger(e) => e.error_code(),
            Self::Inventory(e) => e.error_code(),
            Self::Lock(e) => e.error_code(),
            Self::Idempotency(e) => e.error_code(),
            Self::Translate(e) => e.error_code(),
            Self::Outbox(e) => e.error_code(),
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Returns true if redelivering the event may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_retryable(),
            Self::Inventory(e) => e.is_retryable(),
            Self::Lock(e) => e.is_retryable(),
            Self::Idempotency(e) => e.is_retryable(),
            Self::Translate(_) => false,
            Self::Outbox(e) => e.is_retryable(),
            Self::Database(_) => true,
        }
    }

    fn is_in_progress(&self) -> bool {
        matches!(self, Self::Idempotency(IdempotencyError::InProgress { .. }))
    }
}

impl From<PostingError> for AppError {
    fn from(err: PostingError) -> Self {
        let message = err.to_string();
        if err.is_in_progress() {
            return Self::Conflict(message);
        }
        if err.is_retryable() {
            return match err {
                PostingError::Database(_) => Self::Database(message),
                _ => Self::RetryLater(message),
            };
        }
        match err {
            PostingError::Ledger(
                LedgerError::JournalNotFound(_) | LedgerError::ActiveJournalNotFound(_),
            )
            | PostingError::Inventory(InventoryError::MovementNotFound(_))
            | PostingError::Outbox(OutboxError::NotFound(_)) => Self::NotFound(message),
            PostingError::Translate(_) => Self::Validation(message),
            PostingError::Ledger(_) | PostingError::Inventory(_) => Self::BusinessRule(message),
            _ => Self::Internal(message),
        }
    }
}

/// What happened to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingOutcome {
    /// Document the event was about.
    pub document: DocumentRef,
    /// Plan label, or `duplicate` for a skipped redelivery.
    pub plan: &'static str,
    /// Journals created for the document.
    pub journals: Vec<JournalId>,
    /// Journals of the document that were reversed.
    pub reversed: Vec<JournalId>,
    /// Other documents reposted because their cost moved.
    pub reposted: Vec<Reposted>,
    /// Whether a rebuild-and-retry was needed.
    pub healed: bool,
}

impl PostingOutcome {
    fn new(document: DocumentRef, plan: &'static str) -> Self {
        Self {
            document,
            plan,
            journals: Vec::new(),
            reversed: Vec::new(),
            reposted: Vec::new(),
            healed: false,
        }
    }

    /// Whether the event was a duplicate delivery.
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        self.plan == "duplicate"
    }
}

/// Outcome of a stock key rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildOutcome {
    /// Key rebuilt.
    pub key: StockKey,
    /// Replay start, `None` for the whole history.
    pub from: Option<DateTime<Utc>>,
    /// Documents reposted.
    pub reposted: Vec<Reposted>,
}

/// Accounts and earliest date touched by a posting, for the balance refresh.
#[derive(Debug, Default)]
struct Touched {
    accounts: BTreeSet<AccountId>,
    from: Option<DateTime<Utc>>,
}

impl Touched {
    fn add(&mut self, accounts: impl IntoIterator<Item = AccountId>, at: DateTime<Utc>) {
        self.accounts.extend(accounts);
        self.from = Some(self.from.map_or(at, |from| from.min(at)));
    }

    fn journal(&mut self, journal: &Journal) {
        self.add(
            journal.lines.iter().map(|l| l.account_id),
            journal.transaction_date_time,
        );
    }

    fn reposted(&mut self, reposted: &[Reposted]) {
        for r in reposted.iter().filter(|r| r.replaced) {
            self.add(r.accounts.iter().copied(), r.transaction_date_time);
        }
    }

    async fn refresh(
        self,
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
    ) -> Result<usize, LedgerError> {
        let Some(from) = self.from else {
            return Ok(0);
        };
        let accounts: Vec<AccountId> = self.accounts.into_iter().collect();
        JournalRepository::refresh_closing_balances(txn, tenant_id, &accounts, from).await
    }
}

/// State carried through one posting attempt.
#[derive(Debug)]
struct Pass {
    tenant_id: TenantId,
    document: DocumentRef,
    outcome: PostingOutcome,
    touched: Touched,
    deltas: DocumentDeltas,
}

impl Pass {
    fn new(tenant_id: TenantId, document: DocumentRef, plan: &'static str) -> Self {
        Self {
            tenant_id,
            document,
            outcome: PostingOutcome::new(document, plan),
            touched: Touched::default(),
            deltas: DocumentDeltas::new(),
        }
    }
}

/// Applies change events to the ledger and stock tables.
#[derive(Debug, Clone)]
pub struct PostingService<L = PgAdvisoryLocks> {
    db: DatabaseConnection,
    locks: L,
    lock_timeout: Duration,
    liveness: Duration,
}

impl PostingService<PgAdvisoryLocks> {
    /// Creates a service using PostgreSQL advisory locks.
    #[must_use]
    pub fn with_advisory_locks(db: DatabaseConnection, config: &LockConfig) -> Self {
        Self::new(db, PgAdvisoryLocks::new(), config)
    }
}

impl<L> PostingService<L>
where
    L: LockManager<DatabaseTransaction>,
{
    /// Creates a service with an explicit lock manager.
    #[must_use]
    pub fn new(db: DatabaseConnection, locks: L, config: &LockConfig) -> Self {
        Self {
            db,
            locks,
            lock_timeout: Duration::from_secs(config.acquire_timeout_secs),
            liveness: Duration::from_secs(config.idempotency_liveness_secs),
        }
    }

    /// Processes one event for `handler_name`.
    ///
    /// Redeliveries of a handled event are skipped. A FIFO shortfall is
    /// healed by rebuilding the short key and retrying once. Failures are
    /// recorded on the idempotency key after the posting rolled back.
    ///
    /// # Errors
    ///
    /// Returns `InProgress` while another delivery of the event is running,
    /// otherwise the first error of the final attempt.
    pub async fn process(
        &self,
        handler_name: &str,
        event: &ChangeEvent,
        translator: &dyn DocumentTranslator,
    ) -> Result<PostingOutcome, PostingError> {
        match self.claim(handler_name, event).await {
            Ok(BeginOutcome::Proceed) => {}
            Ok(BeginOutcome::Skip) => {
                return Ok(PostingOutcome::new(event.document(), "duplicate"));
            }
            Err(err) => {
                self.record_failure(handler_name, event, &err).await;
                return Err(err);
            }
        }

        let first = self.attempt(handler_name, event, translator).await;
        let result = match first {
            Err(PostingError::Inventory(err)) if err.is_recoverable() => {
                match self.heal(event.tenant_id, &err).await {
                    Ok(()) => self
                        .attempt(handler_name, event, translator)
                        .await
                        .map(|outcome| PostingOutcome {
                            healed: true,
                            ..outcome
                        }),
                    Err(heal_err) => {
                        tracing::warn!(
                            tenant_id = %event.tenant_id,
                            error = %heal_err,
                            "Rebuild after FIFO shortfall failed"
                        );
                        Err(PostingError::Inventory(err))
                    }
                }
            }
            other => other,
        };

        match result {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.record_failure(handler_name, event, &err).await;
                Err(err)
            }
        }
    }

    /// Rebuilds one stock key from `from` (its first active movement when
    /// `None`) and reposts every document whose cost moved.
    ///
    /// # Errors
    ///
    /// Returns the rebuild, repost, or lock error; nothing is committed.
    pub async fn rebuild(
        &self,
        key: &StockKey,
        from: Option<DateTime<Utc>>,
    ) -> Result<RebuildOutcome, PostingError> {
        let tenant_id = key.tenant_id;
        let conn = RlsConnection::new(&self.db, tenant_id).await?;
        let txn = conn.transaction();
        let posting = self
            .locks
            .acquire(txn, &LockScope::Posting(tenant_id), self.lock_timeout)
            .await?;

        let from = match from {
            Some(from) => Some(from),
            None => earliest_active_date(txn, key).await?,
        };
        let deltas = InventoryRepository::new(&self.locks, self.lock_timeout)
            .rebuild_scope(txn, key, from)
            .await?;
        let reposted = RepostRepository::repost_all(txn, tenant_id, deltas).await?;

        let mut touched = Touched::default();
        touched.reposted(&reposted);
        touched.refresh(txn, tenant_id).await?;

        conn.commit().await?;
        drop(posting);

        tracing::info!(
            tenant_id = %tenant_id,
            key = %key.lock_name(),
            from = ?from,
            reposted = reposted.len(),
            "Rebuild committed"
        );
        Ok(RebuildOutcome {
            key: key.clone(),
            from,
            reposted,
        })
    }

    /// Claims the idempotency key in a transaction of its own.
    async fn claim(
        &self,
        handler_name: &str,
        event: &ChangeEvent,
    ) -> Result<BeginOutcome, PostingError> {
        let txn = self.db.begin().await?;
        let begin = IdempotencyRepository::begin(
            &txn,
            event.tenant_id,
            handler_name,
            event.id,
            self.liveness,
        )
        .await?;
        txn.commit().await?;
        Ok(begin)
    }

    async fn heal(&self, tenant_id: TenantId, err: &InventoryError) -> Result<(), PostingError> {
        let Some(key) = err.shortfall_scope(tenant_id) else {
            return Err(PostingError::Inventory(InventoryError::MalformedScope(
                "shortfall without a stock key".to_string(),
            )));
        };
        tracing::warn!(
            tenant_id = %tenant_id,
            key = %key.lock_name(),
            error = %err,
            "FIFO shortfall, rebuilding before retry"
        );
        self.rebuild(&key, None).await.map(|_| ())
    }

    async fn record_failure(&self, handler_name: &str, event: &ChangeEvent, err: &PostingError) {
        // the key belongs to a live run
        if err.is_in_progress() {
            return;
        }
        tracing::error!(
            tenant_id = %event.tenant_id,
            handler = handler_name,
            message_id = %event.id,
            reference = %event.document(),
            error_code = err.error_code(),
            retryable = err.is_retryable(),
            error = %err,
            "Posting failed"
        );
        let message = format!("{}: {err}", err.error_code());
        if let Err(mark_err) = IdempotencyRepository::mark_failed(
            &self.db,
            event.tenant_id,
            handler_name,
            event.id,
            &message,
        )
        .await
        {
            tracing::error!(
                message_id = %event.id,
                error = %mark_err,
                "Could not record failed run"
            );
        }
    }

    async fn attempt(
        &self,
        handler_name: &str,
        event: &ChangeEvent,
        translator: &dyn DocumentTranslator,
    ) -> Result<PostingOutcome, PostingError> {
        let tenant_id = event.tenant_id;
        let document = event.document();
        let conn = RlsConnection::new(&self.db, tenant_id).await?;
        let txn = conn.transaction();

        let posting = self
            .locks
            .acquire(txn, &LockScope::Posting(tenant_id), self.lock_timeout)
            .await?;

        let plan = plan_for(event, translator).await?;
        let mut pass = Pass::new(tenant_id, document, plan.label());
        match plan {
            PostingPlan::Skip => {}
            PostingPlan::Reverse { reason } => {
                self.reverse_document(txn, &mut pass, &reason).await?;
            }
            PostingPlan::Replace {
                journals,
                movements,
                reason,
            } => {
                self.reverse_document(txn, &mut pass, &reason).await?;
                self.post_document(txn, &mut pass, journals, &movements).await?;
            }
            PostingPlan::Post {
                journals,
                movements,
            } => {
                self.post_document(txn, &mut pass, journals, &movements).await?;
            }
        }

        let Pass {
            mut outcome,
            mut touched,
            deltas,
            ..
        } = pass;
        outcome.reposted = RepostRepository::repost_all(txn, tenant_id, deltas).await?;
        touched.reposted(&outcome.reposted);
        let refreshed = touched.refresh(txn, tenant_id).await?;

        if !OutboxRepository::mark_processed(txn, OutboxRecordId::from_uuid(event.id)).await? {
            tracing::debug!(message_id = %event.id, "Event has no outbox record");
        }
        IdempotencyRepository::mark_succeeded(txn, tenant_id, handler_name, event.id).await?;
        conn.commit().await?;
        drop(posting);

        tracing::info!(
            tenant_id = %tenant_id,
            handler = handler_name,
            message_id = %event.id,
            reference = %document,
            plan = outcome.plan,
            journals = outcome.journals.len(),
            reversed = outcome.reversed.len(),
            reposted = outcome.reposted.len(),
            balances_refreshed = refreshed,
            "Posted event"
        );
        Ok(outcome)
    }

    async fn reverse_document(
        &self,
        txn: &DatabaseTransaction,
        pass: &mut Pass,
        reason: &str,
    ) -> Result<(), PostingError> {
        let mut moved = InventoryRepository::new(&self.locks, self.lock_timeout)
            .reverse_document(txn, pass.tenant_id, pass.document)
            .await?;
        // the document's own journals are reversed below
        moved.take_document(pass.document);
        pass.deltas.merge(moved);

        for journal in JournalRepository::find_all_active(txn, pass.tenant_id, pass.document).await?
        {
            pass.touched.journal(&journal);
            JournalRepository::reverse(txn, pass.tenant_id, journal.id, reason).await?;
            pass.outcome.reversed.push(journal.id);
        }
        Ok(())
    }

    async fn post_document(
        &self,
        txn: &DatabaseTransaction,
        pass: &mut Pass,
        mut journals: Vec<NewJournal>,
        movements: &[NewMovement],
    ) -> Result<(), PostingError> {
        pass.deltas.merge(
            InventoryRepository::new(&self.locks, self.lock_timeout)
                .post_movements(txn, pass.tenant_id, movements)
                .await?,
        );

        // the document's own cost fills its placeholder valuation lines
        for (target, account_deltas) in pass.deltas.take_document(pass.document) {
            let journal = journals
                .iter_mut()
                .find(|j| target.direction.is_none() || journal_direction(j) == target.direction)
                .ok_or(LedgerError::ActiveJournalNotFound(pass.document))?;
            apply_deltas(&mut journal.lines, &account_deltas, target.direction);
        }

        for journal in &journals {
            let created = JournalRepository::create(txn, journal).await?;
            pass.touched.journal(&created);
            pass.outcome.journals.push(created.id);
        }
        Ok(())
    }
}
