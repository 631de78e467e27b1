//! Database layer with `SeaORM` entities and repositories.
//!
//! This crate provides:
//! - `SeaORM` entity definitions and raw-SQL migrations
//! - Repositories for journals, stock movements, idempotency keys and the outbox
//! - PostgreSQL advisory locks
//! - The posting service and the outbox dispatcher

pub mod dispatcher;
pub mod entities;
pub mod locks;
pub mod migration;
pub mod posting;
pub mod repositories;
pub mod rls;

pub use dispatcher::{DispatchSummary, OutboxDispatcher};
pub use locks::PgAdvisoryLocks;
pub use posting::{PostingError, PostingOutcome, PostingService, RebuildOutcome};
pub use repositories::{
    IdempotencyRepository, InventoryRepository, JournalRepository, OutboxRepository,
    ReconciliationRepository, RepostRepository,
};
pub use rls::{RlsConnection, RlsExt};

use std::time::Duration;

use sea_orm::{ConnectOptions, Database, DatabaseConnection, DbErr};
use tally_shared::config::DatabaseConfig;

/// Establishes a connection to the database.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    Database::connect(database_url).await
}

/// Establishes a pooled connection sized from configuration.
///
/// # Errors
///
/// Returns an error if the connection cannot be established.
pub async fn connect_with(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(config.url.clone());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(10))
        .sqlx_logging(false);
    Database::connect(options).await
}
