//! Request middleware.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use db::models::NewAccessLog;
use tracing::warn;

use crate::AppState;

/// Append an `access_logs` row for every request. There is no
/// authentication layer, so every request is recorded as granted.
pub async fn access_log(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned());
    let entry = NewAccessLog {
        ip,
        granted: true,
        identifier: None,
        path: request.uri().path().to_owned(),
        method: request.method().to_string(),
    };
    if let Err(err) = state.orchestrator.store().record_access(&entry).await {
        warn!(error = %err, path = %entry.path, "failed to record access");
    }
    next.run(request).await
}
