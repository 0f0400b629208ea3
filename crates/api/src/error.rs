//! Mapping from engine errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine::EngineError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Engine(err) => match err {
                EngineError::NodeNotFound(_)
                | EngineError::WorkflowNotFound(_)
                | EngineError::TaskNotFound(_) => StatusCode::NOT_FOUND,

                EngineError::NodeUnavailable(_)
                | EngineError::NodeInUse(_)
                | EngineError::TaskAlreadyRunning(_)
                | EngineError::TaskNotRunning(_)
                | EngineError::TaskNotResumable { .. }
                | EngineError::AlreadyRunning
                | EngineError::AlreadyStopped
                | EngineError::ReloadWhileRunning(_) => StatusCode::CONFLICT,

                EngineError::ConfigValidationFailed(_) | EngineError::ConfigParse { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }

                EngineError::NotRunning => StatusCode::SERVICE_UNAVAILABLE,

                EngineError::ConfigIo { .. }
                | EngineError::InconsistentTask { .. }
                | EngineError::StepExecutionFailed { .. }
                | EngineError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
