//! Bullhorn - campaign scheduler entry point

use anyhow::Result;
use bullhorn_common::config::Config;
use bullhorn_core::{CampaignScheduler, HttpGateway};
use bullhorn_storage::db::DatabasePool;
use bullhorn_storage::repository::{DbCampaignStore, DbContactStore, DbSendFailureStore};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first; the log filter comes from it
    let config = Config::load()?;
    init_logging(&config.logging.filter);

    info!("Starting Bullhorn scheduler...");

    // Initialize database
    let db_pool = DatabasePool::new(&config.database).await?;

    // Run migrations
    db_pool.migrate().await?;

    let pool = db_pool.pool().clone();
    let campaigns = Arc::new(DbCampaignStore::new(pool.clone()));
    let contacts = Arc::new(DbContactStore::new(pool.clone()));
    let failures = Arc::new(DbSendFailureStore::new(pool));

    // Messaging gateway client
    let gateway = Arc::new(HttpGateway::new(config.gateway.clone()));

    // Campaign scheduler
    let scheduler = Arc::new(CampaignScheduler::new(
        campaigns,
        contacts,
        failures,
        gateway,
        &config.scheduler,
        config.gateway.token.clone(),
    ));

    let scheduler_handle = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move {
            scheduler.run().await;
        })
    };

    info!("Bullhorn scheduler started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Stop polling and best-effort pause the active dispatchers
    scheduler.stop().await;
    scheduler_handle.await?;

    info!("Bullhorn scheduler shutdown complete");

    Ok(())
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
