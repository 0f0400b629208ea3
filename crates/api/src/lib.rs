//! `api` crate: the HTTP control plane.
//!
//! Routes:
//!   GET    /orchestrator/status
//!   POST   /orchestrator/start
//!   DELETE /orchestrator/stop
//!   GET    /orchestrator/statistics
//!   POST   /task/
//!   GET    /task/running
//!   GET    /task/{id}
//!   GET    /task/{id}/timeline
//!   GET    /task/continue/{id}
//!   PATCH  /task/pause/{id}
//!   GET    /node/
//!   GET    /node/status/{id}
//!   PATCH  /node/restart/{id}
//!   GET    /workflow/
//!   PATCH  /config/reload

pub mod error;
pub mod handlers;
pub mod middleware;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use engine::Orchestrator;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use handlers::{config, nodes, orchestrator, tasks, workflows};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/orchestrator/status", get(orchestrator::status))
        .route("/orchestrator/start", post(orchestrator::start))
        .route("/orchestrator/stop", delete(orchestrator::stop))
        .route("/orchestrator/statistics", get(orchestrator::statistics))
        .route("/task", post(tasks::add))
        .route("/task/", post(tasks::add))
        .route("/task/running", get(tasks::running))
        .route("/task/:id", get(tasks::get))
        .route("/task/:id/timeline", get(tasks::timeline))
        .route("/task/continue/:id", get(tasks::resume))
        .route("/task/pause/:id", patch(tasks::pause))
        .route("/node", get(nodes::list))
        .route("/node/", get(nodes::list))
        .route("/node/status/:id", get(nodes::status))
        .route("/node/restart/:id", patch(nodes::restart))
        .route("/workflow", get(workflows::list))
        .route("/workflow/", get(workflows::list))
        .route("/config/reload", patch(config::reload))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::access_log,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the control plane on `bind` until `shutdown` resolves.
pub async fn serve(
    bind: SocketAddr,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(%bind, "control plane listening");
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}
