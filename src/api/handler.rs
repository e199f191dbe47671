use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

use crate::adapters::traits::SettingsStore;
use crate::api::models::*;
use crate::api::validation::validated;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{Stage, SyncRun};
use crate::ledger::DunningStore;
use crate::scheduler::{BatchRunner, SyncAcceptedResponse};
use crate::stage_engine::catalog::validate_offsets;
use crate::stage_engine::{CaseDetail, CaseSummary, DispatchOutcome, StageCatalog};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DunningStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub runner: Arc<BatchRunner>,
}

/// List cases with their derived progress
/// GET /api/v1/cases?status=active
pub async fn list_cases(
    State(state): State<AppState>,
    Query(query): Query<ListCasesQuery>,
) -> AppResult<Json<Vec<CaseSummary>>> {
    let catalog = StageCatalog::load(state.settings.as_ref()).await;
    let today = BatchRunner::today();

    let records = state.store.list_cases(query.status).await?;
    let mut summaries = Vec::with_capacity(records.len());
    for record in &records {
        let entries = state.store.dispatches_for(&record.case.case_number).await?;
        summaries.push(CaseSummary::build(record, &entries, catalog.total_stages(), today));
    }

    Ok(Json(summaries))
}

/// GET /api/v1/cases/:case_number
pub async fn get_case(
    State(state): State<AppState>,
    Path(case_number): Path<String>,
) -> AppResult<Json<CaseDetail>> {
    let record = state
        .store
        .get_case(&case_number)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Case {}", case_number)))?;

    let catalog = StageCatalog::load(state.settings.as_ref()).await;
    let entries = state.store.dispatches_for(&case_number).await?;

    Ok(Json(CaseDetail::build(
        record,
        entries,
        catalog.total_stages(),
        BatchRunner::today(),
    )))
}

/// Operator-triggered notice for one stage
/// POST /api/v1/cases/:case_number/dispatch/:stage
pub async fn dispatch_stage(
    State(state): State<AppState>,
    Path((case_number, stage)): Path<(String, String)>,
) -> AppResult<(StatusCode, Json<DispatchOutcome>)> {
    let stage: Stage = stage.parse()?;
    info!("✉️ Manual dispatch requested: {} / {}", case_number, stage);

    let outcome = state
        .runner
        .dispatcher()
        .trigger_manual_dispatch(&case_number, stage)
        .await?;

    let status = match outcome {
        DispatchOutcome::Sent { .. } => StatusCode::CREATED,
        DispatchOutcome::AlreadySent { .. } => {
            info!(
                "Stage {} of {} was already sent at {}",
                stage,
                case_number,
                outcome.record().sent_at
            );
            StatusCode::OK
        }
    };
    Ok((status, Json(outcome)))
}

/// Accept a reconciliation run and return 202 immediately
/// POST /api/v1/sync
pub async fn trigger_sync(
    State(state): State<AppState>,
) -> (StatusCode, Json<SyncAcceptedResponse>) {
    (StatusCode::ACCEPTED, Json(state.runner.trigger_reconciliation()))
}

/// GET /api/v1/sync/status?limit=20
pub async fn sync_status(
    State(state): State<AppState>,
    Query(query): Query<SyncStatusQuery>,
) -> AppResult<Json<Vec<SyncRun>>> {
    let query = validated(query)?;
    let runs = state.runner.recent_runs(query.limit.unwrap_or(20)).await?;
    Ok(Json(runs))
}

/// GET /api/v1/settings/stages
pub async fn get_stage_settings(
    State(state): State<AppState>,
) -> AppResult<Json<StageSettingsResponse>> {
    let catalog = StageCatalog::load(state.settings.as_ref()).await;
    Ok(Json(StageSettingsResponse {
        stages: catalog.stages().to_vec(),
    }))
}

/// PUT /api/v1/settings/stages
pub async fn update_stage_settings(
    State(state): State<AppState>,
    Json(request): Json<StageOffsetsRequest>,
) -> AppResult<Json<StageSettingsResponse>> {
    let offsets = validated(request)?.into_offsets();
    validate_offsets(&offsets)?;

    if offsets.is_empty() {
        return Err(AppError::InvalidInput("No stage offsets supplied".to_string()));
    }

    state.settings.save_stage_offsets(&offsets).await?;
    info!("⚙️ Stage offsets updated: {:?}", offsets);

    get_stage_settings(State(state)).await
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let database = state.store.recent_sync_runs(1).await.is_ok();

    Json(HealthResponse {
        status: if database {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: Utc::now(),
        database,
    })
}
