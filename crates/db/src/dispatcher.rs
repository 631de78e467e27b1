//! Outbox dispatcher: claims due records and hands them to a [`Publisher`].
//!
//! Claims commit before anything is published, so a crash mid-publish leaves
//! the record PROCESSING until its claim goes stale and another cycle picks
//! it up. Publish failures never touch ledger state.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use tokio::sync::watch;
use uuid::Uuid;

use tally_core::outbox::{FailureOutcome, OutboxError, OutboxPolicy, Publisher};
use tally_shared::config::DispatcherConfig;

use crate::repositories::OutboxRepository;

/// Counts from one dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Records claimed for publishing.
    pub claimed: usize,
    /// Records published.
    pub sent: usize,
    /// Records scheduled for another attempt.
    pub retried: usize,
    /// Records moved to DEAD, at claim time or after a final failure.
    pub dead_lettered: usize,
    /// Records whose claim moved to another worker before settling.
    pub lost: usize,
}

impl DispatchSummary {
    /// Nothing was due.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.claimed == 0 && self.dead_lettered == 0
    }
}

/// Polls the outbox and publishes due records.
pub struct OutboxDispatcher {
    db: DatabaseConnection,
    publisher: Arc<dyn Publisher>,
    policy: OutboxPolicy,
    worker_id: String,
    batch_size: u64,
    poll_interval: Duration,
}

impl std::fmt::Debug for OutboxDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxDispatcher")
            .field("publisher", &self.publisher.name())
            .field("policy", &self.policy)
            .field("worker_id", &self.worker_id)
            .field("batch_size", &self.batch_size)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl OutboxDispatcher {
    /// Creates a dispatcher from configuration.
    ///
    /// Without a configured worker id a random one is generated.
    #[must_use]
    pub fn new(
        db: DatabaseConnection,
        publisher: Arc<dyn Publisher>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            db,
            publisher,
            policy: OutboxPolicy::from(config),
            worker_id: config
                .worker_id
                .clone()
                .unwrap_or_else(|| format!("worker-{}", Uuid::now_v7())),
            batch_size: config.batch_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    /// Overrides the retry policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: OutboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// This dispatcher's claim holder name.
    #[must_use]
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Runs cycles until `shutdown` turns true or its sender is dropped.
    ///
    /// A cycle in progress always finishes; the loop stops at the next
    /// boundary.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            worker_id = %self.worker_id,
            publisher = self.publisher.name(),
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis(),
            "Outbox dispatcher started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(summary) if !summary.is_idle() => {
                    tracing::info!(
                        worker_id = %self.worker_id,
                        claimed = summary.claimed,
                        sent = summary.sent,
                        retried = summary.retried,
                        dead_lettered = summary.dead_lettered,
                        lost = summary.lost,
                        "Dispatch cycle finished"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(worker_id = %self.worker_id, error = %e, "Dispatch cycle failed");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(worker_id = %self.worker_id, "Outbox dispatcher stopped");
    }

    /// Runs one claim-and-publish cycle.
    ///
    /// # Errors
    ///
    /// Returns an error only if the claim itself fails; per-record failures
    /// are recorded on the records.
    pub async fn run_once(&self) -> Result<DispatchSummary, OutboxError> {
        let batch = OutboxRepository::claim_batch(
            &self.db,
            &self.policy,
            &self.worker_id,
            self.batch_size,
        )
        .await?;

        let mut summary = DispatchSummary {
            claimed: batch.dispatch.len(),
            dead_lettered: batch.dead_lettered.len(),
            ..DispatchSummary::default()
        };

        for record in batch.dispatch {
            let settled = match self.publisher.publish(&record.to_message()).await {
                Ok(transport_id) => {
                    OutboxRepository::mark_sent(&self.db, record.id, &self.worker_id, &transport_id)
                        .await
                        .map(|()| summary.sent += 1)
                }
                Err(publish_err) => OutboxRepository::mark_failed(
                    &self.db,
                    &self.policy,
                    &record,
                    &self.worker_id,
                    &publish_err.to_string(),
                )
                .await
                .map(|outcome| match outcome {
                    FailureOutcome::Retry { .. } => summary.retried += 1,
                    FailureOutcome::Dead => summary.dead_lettered += 1,
                }),
            };

            match settled {
                Ok(()) => {}
                Err(OutboxError::NotHeld { .. }) => {
                    tracing::warn!(
                        record_id = %record.id,
                        worker_id = %self.worker_id,
                        "Outbox claim lost before settling"
                    );
                    summary.lost += 1;
                }
                Err(e) => {
                    tracing::error!(record_id = %record.id, error = %e, "Could not settle outbox record");
                    summary.lost += 1;
                }
            }
        }
        Ok(summary)
    }
}
