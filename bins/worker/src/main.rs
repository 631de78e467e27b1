//! Tally outbox worker
//!
//! Polls the outbox and publishes change events until interrupted.

mod publisher;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_core::outbox::Publisher;
use tally_db::{OutboxDispatcher, connect_with};
use tally_shared::AppConfig;
use tally_shared::config::LogFormat;

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tally=info,tally_db=info,tally_worker=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(config.log.format);

    let db = connect_with(&config.database).await?;
    info!(
        max_connections = config.database.max_connections,
        "Connected to database"
    );

    let publisher: Arc<dyn Publisher> = Arc::from(publisher::from_config(&config.publisher)?);
    let dispatcher = OutboxDispatcher::new(db, publisher, &config.dispatcher);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Could not listen for shutdown signal");
            return;
        }
        info!("Shutdown requested, finishing current cycle");
        let _ = shutdown_tx.send(true);
    });

    dispatcher.run(shutdown_rx).await;
    Ok(())
}
