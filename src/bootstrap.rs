use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::info;

use crate::{
    adapters::infakt::InfaktClient,
    api::handler::AppState,
    config::Config,
    error::AppResult,
    ledger::repository::LedgerRepository,
    notifications::{MessageTemplates, ResendNotifier},
    reconciliation::ReconciliationEngine,
    scheduler::{BatchRunner, DunningScheduler},
    stage_engine::DispatchScheduler,
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    // Database pool
    let pool = initialize_database(&config.database_url).await?;

    // Core components
    let ledger = Arc::new(LedgerRepository::new(pool));

    let source = Arc::new(InfaktClient::new(
        config.infakt_base_url.clone(),
        config.infakt_api_key.clone(),
        config.source_requests_per_minute,
    )?);
    info!(
        "✅ inFakt client initialized ({} requests/min)",
        config.source_requests_per_minute
    );

    let notifier = Arc::new(ResendNotifier::new(
        config.resend_api_key.clone(),
        config.resend_from_email.clone(),
        config.resend_base_url.clone(),
    )?);
    info!("✅ Resend notifier initialized (from {})", config.resend_from_email);

    let templates = Arc::new(MessageTemplates::builtin(config.creditor()));

    let reconciliation = Arc::new(ReconciliationEngine::new(
        ledger.clone(),
        ledger.clone(),
        source,
        config.reconciliation(),
    ));

    let dispatcher = Arc::new(DispatchScheduler::new(
        ledger.clone(),
        ledger.clone(),
        notifier,
        templates,
        config.delivery(),
    ));

    let runner = Arc::new(BatchRunner::new(ledger.clone(), reconciliation, dispatcher));

    // Daily batch at the configured hour
    let scheduler = DunningScheduler::new(config.schedule(), runner.clone());
    if scheduler.start().is_some() {
        info!("✅ Daily scheduler started ({}:00 UTC)", config.execution_hour);
    }

    Ok(AppState {
        store: ledger.clone(),
        settings: ledger,
        runner,
    })
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await?;

    info!("✓ Database pool configured: 20 max connections");

    // Run migrations
    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
