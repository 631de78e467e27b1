//! Advisory lock capability.
//!
//! Ledger-mutating work takes named mutexes: `posting:{tenant}` for the
//! posting path and `inv_rebuild:{...}` per stock key for rebuilds. The
//! backend is injected so repositories can run against PostgreSQL advisory
//! locks in production and an in-process registry in unit tests.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

use tally_shared::types::TenantId;

use crate::inventory::StockKey;

/// Default upper bound on how long a caller waits for a lock.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// What a lock protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// All ledger-mutating work of one tenant.
    Posting(TenantId),
    /// Rebuild of one stock key.
    Rebuild(StockKey),
}

impl LockScope {
    /// The advisory lock name.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Posting(tenant_id) => format!("posting:{tenant_id}"),
            Self::Rebuild(key) => key.lock_name(),
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Lock acquisition errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was still held when the deadline passed.
    #[error("Timed out after {waited:?} waiting for lock {name}")]
    Timeout {
        /// Lock name.
        name: String,
        /// How long the caller waited.
        waited: Duration,
    },

    /// The lock backend failed.
    #[error("Lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    /// Returns the error code for logs and downstream consumers.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "LOCK_TIMEOUT",
            Self::Backend(_) => "LOCK_BACKEND_ERROR",
        }
    }

    /// Lock failures are transient; the caller may redeliver.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Backend(_))
    }
}

/// Acquires named mutexes on behalf of a session.
///
/// `S` is whatever the backend needs to hold the lock: a database
/// transaction for advisory locks, `()` for the in-memory manager. The guard
/// releases the lock when dropped, or when the session ends for
/// transaction-scoped backends.
#[async_trait]
pub trait LockManager<S: ?Sized + Sync>: Send + Sync {
    /// Held-lock token.
    type Guard: Send;

    /// Waits up to `timeout` for the lock named by `scope`.
    async fn acquire(
        &self,
        session: &S,
        scope: &LockScope,
        timeout: Duration,
    ) -> Result<Self::Guard, LockError>;
}

type Registry = Arc<DashMap<String, Arc<Mutex<()>>>>;

/// Drops the entry for `name` once nobody holds or waits on it.
fn prune(locks: &Registry, name: &str) {
    locks.remove_if(name, |_, slot| Arc::strong_count(slot) == 1);
}

/// In-process lock registry.
///
/// An entry lives only while its lock is held or awaited.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLockManager {
    locks: Registry,
}

impl InMemoryLockManager {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of names currently held or awaited.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock is held or awaited.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn slot(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Held in-memory lock; releasing it prunes the registry entry.
#[derive(Debug)]
pub struct InMemoryGuard {
    guard: Option<OwnedMutexGuard<()>>,
    name: String,
    locks: Registry,
}

impl Drop for InMemoryGuard {
    fn drop(&mut self) {
        // the guard keeps its slot alive until it is released
        drop(self.guard.take());
        prune(&self.locks, &self.name);
    }
}

#[async_trait]
impl<S: ?Sized + Sync> LockManager<S> for InMemoryLockManager {
    type Guard = InMemoryGuard;

    async fn acquire(
        &self,
        _session: &S,
        scope: &LockScope,
        timeout: Duration,
    ) -> Result<Self::Guard, LockError> {
        let name = scope.name();
        let slot = self.slot(&name);
        match tokio::time::timeout(timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(InMemoryGuard {
                guard: Some(guard),
                name,
                locks: Arc::clone(&self.locks),
            }),
            Err(_) => {
                prune(&self.locks, &name);
                Err(LockError::Timeout {
                    name,
                    waited: timeout,
                })
            }
        }
    }
}
