use axum::{
    extract::{Path, State},
    Json,
};
use engine::{NodeSnapshot, NodeStatus};

use crate::error::ApiResult;
use crate::AppState;

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<NodeSnapshot>>> {
    Ok(Json(state.orchestrator.nodes()?))
}

pub async fn status(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<NodeStatus>> {
    Ok(Json(state.orchestrator.node_status(&id).await?))
}

pub async fn restart(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<NodeSnapshot>> {
    Ok(Json(state.orchestrator.restart_node(&id).await?))
}
