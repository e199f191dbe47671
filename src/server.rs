use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{
    dispatch_stage, get_case, get_stage_settings, health_check, list_cases, sync_status,
    trigger_sync, update_stage_settings, AppState,
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Cases
                .route("/cases", get(list_cases))
                .route("/cases/:case_number", get(get_case))
                .route("/cases/:case_number/dispatch/:stage", post(dispatch_stage))
                // Batch runs
                .route("/sync", post(trigger_sync))
                .route("/sync/status", get(sync_status))
                // Settings
                .route(
                    "/settings/stages",
                    get(get_stage_settings).put(update_stage_settings),
                ),
        )
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
