//! PostgreSQL advisory locks.
//!
//! Locks are transaction scoped (`pg_try_advisory_xact_lock`): they are held
//! by the transaction that acquired them and released when it commits or
//! rolls back. The name is hashed to the 64-bit key space with
//! `hashtextextended`.

use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseTransaction, DbBackend, Statement};
use tokio::time::Instant;

use tally_core::lock::{LockError, LockManager, LockScope};

const TRY_LOCK_SQL: &str =
    "SELECT pg_try_advisory_xact_lock(hashtextextended($1, 0)) AS acquired";

/// Delay between attempts while a lock is held elsewhere.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Advisory lock manager backed by the caller's transaction.
#[derive(Debug, Clone, Copy)]
pub struct PgAdvisoryLocks {
    poll_interval: Duration,
}

impl Default for PgAdvisoryLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl PgAdvisoryLocks {
    /// Creates a manager with the default poll interval.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the delay between attempts.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn try_lock(txn: &DatabaseTransaction, name: &str) -> Result<bool, LockError> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, TRY_LOCK_SQL, [name.into()]);
        let row = txn
            .query_one(stmt)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?
            .ok_or_else(|| LockError::Backend("advisory lock query returned no row".to_string()))?;
        row.try_get::<bool>("", "acquired")
            .map_err(|e| LockError::Backend(e.to_string()))
    }
}

#[async_trait]
impl LockManager<DatabaseTransaction> for PgAdvisoryLocks {
    /// The lock lives as long as the transaction.
    type Guard = ();

    async fn acquire(
        &self,
        session: &DatabaseTransaction,
        scope: &LockScope,
        timeout: Duration,
    ) -> Result<(), LockError> {
        let name = scope.name();
        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            if Self::try_lock(session, &name).await? {
                tracing::debug!(lock = %name, waited_ms = started.elapsed().as_millis(), "Acquired advisory lock");
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(lock = %name, ?timeout, "Advisory lock acquire timed out");
                return Err(LockError::Timeout {
                    name,
                    waited: now - started,
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}
