//! Outbox delivery policy.
//!
//! The dispatcher in the `db` crate claims due records, hands them to a
//! [`Publisher`] outside the claiming transaction and records the outcome.
//! Everything that decides *when* a record is retried or dead-lettered lives
//! here so it can be tested without a database.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_shared::config::DispatcherConfig;
use tally_shared::error::AppError;
use tally_shared::types::OutboxRecordId;

use crate::events::ChangeEvent;

/// Delivery state of an outbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    /// Waiting for its first attempt.
    Pending,
    /// Claimed by a worker.
    Processing,
    /// Delivered.
    Sent,
    /// Last attempt failed; due again at `next_attempt_at`.
    Failed,
    /// Gave up after `max_attempts`.
    Dead,
}

impl PublishState {
    /// Returns the stable storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
            Self::Dead => "DEAD",
        }
    }

    /// Whether the record will never be attempted again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Dead)
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublishState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            "DEAD" => Ok(Self::Dead),
            other => Err(format!("Unknown publish state: {other}")),
        }
    }
}

/// A durable outbox record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Record id; equal to `event.id`.
    pub id: OutboxRecordId,
    /// The change-event envelope.
    pub event: ChangeEvent,
    /// Whether the posting handler has applied the event.
    pub is_processed: bool,
    /// Delivery state.
    pub state: PublishState,
    /// Claims made so far.
    pub attempts: i32,
    /// Worker holding the current claim.
    pub locked_by: Option<String>,
    /// When the current claim was made.
    pub locked_at: Option<DateTime<Utc>>,
    /// Earliest time of the next attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Error from the last failed attempt.
    pub last_error: Option<String>,
    /// Id assigned by the transport on success.
    pub transport_message_id: Option<String>,
    /// Enqueue time.
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Builds a fresh PENDING record for an event.
    ///
    /// Timestamps are cut to microseconds, the precision they are stored at.
    #[must_use]
    pub fn pending(mut event: ChangeEvent, now: DateTime<Utc>) -> Self {
        event.transaction_date_time = event.transaction_date_time.trunc_subsecs(6);
        Self {
            id: OutboxRecordId::from_uuid(event.id),
            event,
            is_processed: false,
            state: PublishState::Pending,
            attempts: 0,
            locked_by: None,
            locked_at: None,
            next_attempt_at: None,
            last_error: None,
            transport_message_id: None,
            created_at: now.trunc_subsecs(6),
        }
    }

    /// The payload handed to publishers.
    #[must_use]
    pub fn to_message(&self) -> OutboxMessage {
        OutboxMessage {
            record_id: self.id,
            attempt: self.attempts,
            event: self.event.clone(),
        }
    }
}

/// What a publisher receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Outbox record id; consumers de-duplicate on it.
    pub record_id: OutboxRecordId,
    /// Attempt number, starting at 1.
    pub attempt: i32,
    /// The change-event envelope.
    pub event: ChangeEvent,
}

/// Verdict for a record selected by a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Mark PROCESSING and publish.
    Dispatch,
    /// Attempts are exhausted; mark DEAD without publishing.
    DeadLetter,
}

/// What to record after a failed publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Mark FAILED, due again at the given time.
    Retry {
        /// Earliest time of the next attempt.
        next_attempt_at: DateTime<Utc>,
    },
    /// Mark DEAD.
    Dead,
}

/// Retry and dead-letter policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboxPolicy {
    /// Attempts after which a record is dead-lettered.
    pub max_attempts: i32,
    /// Delay before the first retry.
    pub base_backoff: Duration,
    /// Upper bound on the retry delay.
    pub max_backoff: Duration,
    /// Age after which a PROCESSING claim is presumed abandoned.
    pub lock_timeout: Duration,
}

impl Default for OutboxPolicy {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

impl From<&DispatcherConfig> for OutboxPolicy {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_backoff: Duration::from_secs(config.base_backoff_secs),
            max_backoff: Duration::from_secs(config.max_backoff_secs),
            lock_timeout: Duration::from_secs(config.lock_timeout_secs),
        }
    }
}

impl OutboxPolicy {
    /// Delay after the `attempt`-th failure: `base * 2^(attempt - 1)`, capped.
    #[must_use]
    pub fn backoff_delay(&self, attempt: i32) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(0);
        let factor = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }

    /// Decides what a claim does with a record that has made `attempts`
    /// attempts so far.
    #[must_use]
    pub const fn claim_decision(&self, attempts: i32) -> ClaimDecision {
        if attempts >= self.max_attempts {
            ClaimDecision::DeadLetter
        } else {
            ClaimDecision::Dispatch
        }
    }

    /// Decides what to record after the `attempts`-th publish failed.
    #[must_use]
    pub fn on_failure(&self, attempts: i32, now: DateTime<Utc>) -> FailureOutcome {
        if attempts >= self.max_attempts {
            return FailureOutcome::Dead;
        }
        let delay = chrono::Duration::from_std(self.backoff_delay(attempts))
            .unwrap_or_else(|_| chrono::Duration::seconds(600));
        FailureOutcome::Retry {
            next_attempt_at: now + delay,
        }
    }

    /// Whether a claim at `now` may select the record.
    ///
    /// PENDING and FAILED records are eligible once due; PROCESSING records
    /// are eligible again when their claim is older than the lock timeout.
    #[must_use]
    pub fn is_eligible(&self, record: &OutboxRecord, now: DateTime<Utc>) -> bool {
        match record.state {
            PublishState::Pending | PublishState::Failed => {
                record.next_attempt_at.is_none_or(|at| at <= now)
            }
            PublishState::Processing => record.locked_at.is_none_or(|at| {
                (now - at)
                    .to_std()
                    .is_ok_and(|held| held >= self.lock_timeout)
            }),
            PublishState::Sent | PublishState::Dead => false,
        }
    }
}

/// Transport failure reported by a publisher.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The transport could not be reached.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport answered with a failure.
    #[error("Rejected with status {status}: {body}")]
    Rejected {
        /// Transport status code.
        status: u16,
        /// Response body, possibly truncated.
        body: String,
    },

    /// The message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<PublishError> for AppError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Serialization(_) => Self::Internal(err.to_string()),
            PublishError::Transport(_) | PublishError::Rejected { .. } => {
                Self::ExternalService(err.to_string())
            }
        }
    }
}

/// Outbox errors.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// No record with this id.
    #[error("Outbox record not found: {0}")]
    NotFound(OutboxRecordId),

    /// The record is not claimed by this worker.
    #[error("Outbox record {id} is not held by worker {worker_id}")]
    NotHeld {
        /// Record id.
        id: OutboxRecordId,
        /// Worker that tried to update it.
        worker_id: String,
    },

    /// A stored value could not be decoded.
    #[error("Corrupt outbox record {id}: {reason}")]
    Corrupt {
        /// Record id.
        id: OutboxRecordId,
        /// What was wrong.
        reason: String,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl OutboxError {
    /// Returns the error code for logs and downstream consumers.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "OUTBOX_RECORD_NOT_FOUND",
            Self::NotHeld { .. } => "OUTBOX_RECORD_NOT_HELD",
            Self::Corrupt { .. } => "OUTBOX_RECORD_CORRUPT",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Returns true if the operation may succeed when retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Delivers outbox messages to downstream consumers.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Publishes one message and returns the transport's message id.
    async fn publish(&self, message: &OutboxMessage) -> Result<String, PublishError>;
}
