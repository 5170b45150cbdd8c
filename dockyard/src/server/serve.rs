//! HTTP server setup

use std::future::Future;
use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::options::ServerOptions;
use crate::errors::PlatformError;
use crate::server::handlers::{
    container_logs_handler, create_env_handler, create_project_handler, delete_env_handler,
    delete_project_handler, deploy_handler, get_deployment_handler, get_project_handler,
    health_handler, infra_containers_handler, infra_stats_handler, list_deployments_handler,
    list_env_handler, list_projects_handler, metrics_handler, restart_handler, stop_handler,
    update_project_handler, version_handler,
};
use crate::server::state::ServerState;
use crate::server::stream::deployment_stream_handler;

/// Build the API router
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        // Health and version
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        // Projects
        .route(
            "/projects",
            post(create_project_handler).get(list_projects_handler),
        )
        .route(
            "/projects/{id}",
            get(get_project_handler)
                .patch(update_project_handler)
                .delete(delete_project_handler),
        )
        // Deployments
        .route("/projects/{id}/deploy", post(deploy_handler))
        .route("/projects/{id}/deployments", get(list_deployments_handler))
        .route("/deployments/{id}", get(get_deployment_handler))
        .route(
            "/deployments/{id}/logs/stream",
            get(deployment_stream_handler),
        )
        // Container control
        .route("/projects/{id}/restart", post(restart_handler))
        .route("/projects/{id}/stop", post(stop_handler))
        .route("/projects/{id}/metrics", get(metrics_handler))
        .route("/projects/{id}/logs", get(container_logs_handler))
        // Environment
        .route(
            "/projects/{id}/env",
            get(list_env_handler).post(create_env_handler),
        )
        .route("/projects/{id}/env/{env_id}", delete(delete_env_handler))
        // Infrastructure
        .route("/infra/stats", get(infra_stats_handler))
        .route("/infra/containers", get(infra_containers_handler))
        // State and middleware
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Start the HTTP server
pub async fn serve(
    options: &ServerOptions,
    state: Arc<ServerState>,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<JoinHandle<Result<(), PlatformError>>, PlatformError> {
    let app = router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("Starting HTTP server on {}", addr);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| PlatformError::ServerError(e.to_string()))?;

    let handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| PlatformError::ServerError(e.to_string()))
    });

    Ok(handle)
}
