use axum::{extract::State, Json};
use engine::models::Step;
use serde::Serialize;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WorkflowView {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub destination: String,
    pub steps: Vec<Step>,
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<WorkflowView>>> {
    let workflows = state
        .orchestrator
        .workflows()?
        .into_iter()
        .map(|workflow| WorkflowView {
            id: workflow.id,
            name: workflow.name.clone(),
            source: workflow.source_node().to_owned(),
            destination: workflow.destination_node().to_owned(),
            steps: workflow.steps,
        })
        .collect();
    Ok(Json(workflows))
}
