//! Valuation delta reposting: reverse the active journal of a document and
//! insert a replacement carrying the adjusted valuation lines.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sea_orm::DatabaseTransaction;

use tally_core::ledger::{Journal, LedgerError};
use tally_core::valuation::{AccountDeltas, DeltaTarget, DocumentDeltas, build_replacement};
use tally_shared::types::{AccountId, JournalId, TenantId};

use super::journal::JournalRepository;

const REPOST_REASON: &str = "valuation repost";

/// Outcome of reposting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reposted {
    /// Target that was reposted.
    pub target: DeltaTarget,
    /// Journal active after the repost.
    pub journal_id: JournalId,
    /// Whether a replacement was written.
    pub replaced: bool,
    /// Accounts on the reversed and replacement journals.
    pub accounts: BTreeSet<AccountId>,
    /// Business timestamp shared by both journals.
    pub transaction_date_time: DateTime<Utc>,
}

/// Reposting repository.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepostRepository;

impl RepostRepository {
    /// Applies `deltas` to the active journal of `target`.
    ///
    /// An all-zero delta set leaves the journal alone and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `ActiveJournalNotFound` if the document has no active journal
    /// for the direction, `UnbalancedJournal` if the replacement would not
    /// balance, or `Database`.
    pub async fn repost(
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        target: DeltaTarget,
        deltas: &AccountDeltas,
    ) -> Result<Reposted, LedgerError> {
        let active: Journal =
            JournalRepository::find_active(txn, tenant_id, target.document, target.direction)
                .await?
                .ok_or(LedgerError::ActiveJournalNotFound(target.document))?;

        let Some(replacement) = build_replacement(&active, deltas, target.direction)? else {
            return Ok(Reposted {
                target,
                journal_id: active.id,
                replaced: false,
                accounts: BTreeSet::new(),
                transaction_date_time: active.transaction_date_time,
            });
        };

        JournalRepository::reverse(txn, tenant_id, active.id, REPOST_REASON).await?;
        let created = JournalRepository::create(txn, &replacement).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            reference = %target.document,
            direction = ?target.direction,
            replaced_journal_id = %active.id,
            journal_id = %created.id,
            accounts = deltas.len(),
            "Reposted valuation deltas"
        );
        Ok(Reposted {
            target,
            journal_id: created.id,
            replaced: true,
            accounts: active
                .lines
                .iter()
                .chain(&created.lines)
                .map(|l| l.account_id)
                .collect(),
            transaction_date_time: active.transaction_date_time,
        })
    }

    /// Reposts every document in `deltas`, once each.
    ///
    /// # Errors
    ///
    /// Propagates the first failure; the caller's transaction then rolls
    /// everything back.
    pub async fn repost_all(
        txn: &DatabaseTransaction,
        tenant_id: TenantId,
        deltas: DocumentDeltas,
    ) -> Result<Vec<Reposted>, LedgerError> {
        let mut reposted = Vec::with_capacity(deltas.len());
        for (target, account_deltas) in deltas.without_zero() {
            reposted.push(Self::repost(txn, tenant_id, target, &account_deltas).await?);
        }
        Ok(reposted)
    }
}
