//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::OrchestratorError;
use crate::server::handlers::{
    add_approvers_handler, create_deployment_handler, decide_handler, deployment_status_handler,
    get_deployment_handler, health_handler, list_approvals_handler, list_deployments_handler,
    rollback_deployment_handler, schedule_deployment_handler, start_deployment_handler,
    stop_deployment_handler, version_handler,
};
use crate::server::state::ServerState;

/// Build the API router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Deployments
        .route(
            "/deployments",
            get(list_deployments_handler).post(create_deployment_handler),
        )
        .route("/deployments/{id}", get(get_deployment_handler))
        .route("/deployments/{id}/status", get(deployment_status_handler))
        .route("/deployments/{id}/schedule", post(schedule_deployment_handler))
        .route("/deployments/{id}/start", post(start_deployment_handler))
        .route("/deployments/{id}/stop", post(stop_deployment_handler))
        .route("/deployments/{id}/rollback", post(rollback_deployment_handler))
        // Approvals
        .route("/deployments/{id}/approvals", get(list_approvals_handler))
        .route("/deployments/{id}/approvers", post(add_approvers_handler))
        .route("/deployments/{id}/decision", post(decide_handler))
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), OrchestratorError>>, OrchestratorError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| OrchestratorError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| OrchestratorError::ServerError(e.to_string()))
    });

    Ok(handle)
}
