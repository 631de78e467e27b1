//! Idempotency key state machine.
//!
//! A handler run is keyed by (tenant, handler name, message id). The first
//! delivery inserts a STARTED row; later deliveries read that row and either
//! skip, back off, or take the key over.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use tally_shared::types::TenantId;

/// How long a STARTED key is presumed to belong to a live handler.
pub const DEFAULT_LIVENESS: Duration = Duration::from_secs(300);

/// Status of an idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    /// A handler is (or was) running.
    Started,
    /// The handler committed its effects.
    Succeeded,
    /// The handler failed; the key can be reclaimed.
    Failed,
}

impl IdempotencyStatus {
    /// Returns the stable storage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdempotencyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Self::Started),
            "SUCCEEDED" => Ok(Self::Succeeded),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("Unknown idempotency status: {other}")),
        }
    }
}

/// A stored idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Handler scope.
    pub handler_name: String,
    /// Message being handled.
    pub message_id: Uuid,
    /// Current status.
    pub status: IdempotencyStatus,
    /// Error recorded by the last failed run.
    pub last_error: Option<String>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// What the caller should do after beginning a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Run the handler.
    Proceed,
    /// The message was already handled.
    Skip,
}

/// Verdict on a key that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Already succeeded.
    Skip,
    /// Stale or failed; take it over.
    Reclaim,
}

/// Idempotency errors.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// Another handler holds a fresh STARTED key. Redeliver later.
    #[error("Message {message_id} is already being handled by {handler_name}")]
    InProgress {
        /// Handler scope.
        handler_name: String,
        /// Message id.
        message_id: Uuid,
    },

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl IdempotencyError {
    /// Returns the error code for logs and downstream consumers.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InProgress { .. } => "IDEMPOTENCY_IN_PROGRESS",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Both variants ask for redelivery.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InProgress { .. } | Self::Database(_))
    }
}

/// Decides what to do with a key that already exists.
///
/// # Errors
///
/// Returns `InProgress` when the key is STARTED and younger than `liveness`.
pub fn decide(
    existing: &IdempotencyRecord,
    now: DateTime<Utc>,
    liveness: Duration,
) -> Result<Decision, IdempotencyError> {
    match existing.status {
        IdempotencyStatus::Succeeded => Ok(Decision::Skip),
        IdempotencyStatus::Failed => Ok(Decision::Reclaim),
        IdempotencyStatus::Started => {
            let age = (now - existing.updated_at).to_std().unwrap_or(Duration::ZERO);
            if age < liveness {
                Err(IdempotencyError::InProgress {
                    handler_name: existing.handler_name.clone(),
                    message_id: existing.message_id,
                })
            } else {
                Ok(Decision::Reclaim)
            }
        }
    }
}
