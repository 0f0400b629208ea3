use axum::{extract::State, Json};
use engine::{OrchestratorStatus, WorkflowSpec};
use nodes::NodeSpec;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::AppState;

/// Inline definitions; whichever half is missing is re-read from disk.
#[derive(Debug, Default, Deserialize)]
pub struct ReloadDto {
    pub nodes: Option<Vec<NodeSpec>>,
    pub workflows: Option<Vec<WorkflowSpec>>,
}

pub async fn reload(
    State(state): State<AppState>,
    payload: Option<Json<ReloadDto>>,
) -> ApiResult<Json<OrchestratorStatus>> {
    let payload = payload.map(|Json(dto)| dto).unwrap_or_default();
    state
        .orchestrator
        .reload(payload.nodes, payload.workflows)
        .await?;
    Ok(Json(state.orchestrator.status()))
}
