use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use db::models::ExecutionLogRow;
use engine::Task;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AddTaskDto {
    pub workflow_name: String,
    #[serde(default)]
    pub args: Value,
    /// Skip node calls for this task only.
    #[serde(default)]
    pub emulate: bool,
}

#[derive(Debug, Serialize)]
pub struct TaskRef {
    pub id: Uuid,
}

pub async fn add(
    State(state): State<AppState>,
    Json(payload): Json<AddTaskDto>,
) -> ApiResult<(StatusCode, Json<TaskRef>)> {
    let task = state
        .orchestrator
        .create_task(&payload.workflow_name, payload.args, payload.emulate)
        .await?;
    Ok((StatusCode::CREATED, Json(TaskRef { id: task.id })))
}

pub async fn get(Path(id): Path<Uuid>, State(state): State<AppState>) -> ApiResult<Json<Task>> {
    Ok(Json(state.orchestrator.get_task(id).await?))
}

pub async fn running(State(state): State<AppState>) -> ApiResult<Json<Vec<Task>>> {
    Ok(Json(state.orchestrator.list_running().await?))
}

pub async fn resume(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task = state.orchestrator.continue_task(id).await?;
    Ok((StatusCode::ACCEPTED, Json(task)))
}

pub async fn pause(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<(StatusCode, Json<TaskRef>)> {
    state.orchestrator.pause_task(id)?;
    Ok((StatusCode::ACCEPTED, Json(TaskRef { id })))
}

pub async fn timeline(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<ExecutionLogRow>>> {
    Ok(Json(state.orchestrator.timeline(id).await?))
}
