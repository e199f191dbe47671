mod adapters;
mod api;
mod bootstrap;
mod config;
mod error;
mod ledger;
mod notifications;
mod reconciliation;
mod scheduler;
mod server;
mod stage_engine;
#[cfg(test)]
mod testing;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,dunning=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting dunning service");

    let config = config::Config::from_env().context("loading configuration")?;

    let state = bootstrap::initialize_app_state(&config)
        .await
        .context("initializing application state")?;

    // Create HTTP server
    let app = server::create_app(state);

    server::run_server(app, &config.bind_address).await?;

    Ok(())
}
