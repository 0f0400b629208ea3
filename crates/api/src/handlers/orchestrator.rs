use axum::{extract::State, Json};
use engine::{OrchestratorStatus, Statistics};

use crate::error::ApiResult;
use crate::AppState;

pub async fn status(State(state): State<AppState>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator.status())
}

pub async fn start(State(state): State<AppState>) -> ApiResult<Json<OrchestratorStatus>> {
    state.orchestrator.start().await?;
    Ok(Json(state.orchestrator.status()))
}

pub async fn stop(State(state): State<AppState>) -> ApiResult<Json<OrchestratorStatus>> {
    state.orchestrator.stop().await?;
    Ok(Json(state.orchestrator.status()))
}

pub async fn statistics(State(state): State<AppState>) -> ApiResult<Json<Statistics>> {
    Ok(Json(state.orchestrator.statistics().await?))
}
