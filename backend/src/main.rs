use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod error;
mod integrations;
mod jobs;
mod services;
mod workflows;

#[cfg(test)]
mod tests;

use config::Config;
use integrations::{client::build_http_client, ClientCache};
use jobs::JobScheduler;
use services::{AuditTrail, FileRegistry, NotificationDispatcher, WebhookNotifier};
use workflows::{WorkflowExecutor, WorkflowSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    config.validate()?;

    info!(registry = %config.registry_file.display(), "Starting traffic monitor");

    let registry = Arc::new(FileRegistry::open(&config.registry_file).await?);
    let http = build_http_client(config.http.timeout())?;
    let gateways = Arc::new(ClientCache::new(http, config.endpoints.clone()));
    let notifier = Arc::new(WebhookNotifier::new(
        config.http.notify_timeout(),
        config.notify_webhook_url.clone(),
    )?);
    let audit = Arc::new(AuditTrail::new());

    let executor = Arc::new(WorkflowExecutor::new(
        registry.clone(),
        registry.clone(),
        gateways,
        NotificationDispatcher::new(notifier),
        audit,
        WorkflowSettings::from_config(&config)?,
    ));

    let scheduler = Arc::new(
        JobScheduler::new(executor, registry.clone(), registry, config.scheduler.clone()).await?,
    );

    let stats = scheduler.sync_accounts().await;
    info!(jobs = stats.added, skipped = stats.skipped, "Initial account sync complete");

    scheduler.schedule_reconcile().await?;
    scheduler.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Err(e) = scheduler.shutdown().await {
        error!("Scheduler shutdown failed: {}", e);
    }
    Ok(())
}
