//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use dockyard_api::{
    ContainerResponse, CreateEnvVarRequest, CreateProjectRequest, DeploymentResponse,
    EnvVarResponse, HealthResponse, HostStats, InfraStatsResponse, LogsResponse, MessageResponse,
    MetricsResponse, ProjectResponse, UpdateProjectRequest, VersionResponse,
};
use serde::Deserialize;

use crate::deploy::orchestrator::{InfraStats, Orchestrator, DEFAULT_LOG_LINES};
use crate::models::container::ContainerInfo;
use crate::models::deployment::Deployment;
use crate::models::env_var::MaskedEnvVar;
use crate::models::ids::{DeploymentId, EnvVarId, ProjectId};
use crate::models::project::{NewProject, Project, ProjectUpdate};
use crate::server::auth::Authenticated;
use crate::server::errors::ApiResult;
use crate::server::state::ServerState;
use crate::utils::version_info;

// ================================= SERVICE ===================================== //

/// Health check handler
pub async fn health_handler() -> Json<HealthResponse> {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "dockyard".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> Json<VersionResponse> {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

// ================================= PROJECTS ===================================== //

pub async fn create_project_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<ProjectResponse>)> {
    let project = state
        .orchestrator
        .create_project(
            &principal,
            NewProject {
                name: request.name,
                repository_url: request.repository_url,
                branch: request.branch,
                port: request.port,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(project_response(&state.orchestrator, &project)),
    ))
}

pub async fn list_projects_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
) -> ApiResult<Json<Vec<ProjectResponse>>> {
    let projects = state.orchestrator.list_projects(&principal).await?;
    Ok(Json(
        projects
            .iter()
            .map(|p| project_response(&state.orchestrator, p))
            .collect(),
    ))
}

pub async fn get_project_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<ProjectResponse>> {
    let project = state
        .orchestrator
        .get_project(&principal, &ProjectId::new(id))
        .await?;
    Ok(Json(project_response(&state.orchestrator, &project)))
}

pub async fn update_project_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(request): Json<UpdateProjectRequest>,
) -> ApiResult<Json<ProjectResponse>> {
    let update = ProjectUpdate {
        name: request.name,
        repository_url: request.repository_url,
        branch: request.branch,
        port: request.port,
    };
    let project = state
        .orchestrator
        .update_project(&principal, &ProjectId::new(id), update)
        .await?;
    Ok(Json(project_response(&state.orchestrator, &project)))
}

pub async fn delete_project_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .delete_project(&principal, &ProjectId::new(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================== DEPLOYMENTS ==================================== //

pub async fn deploy_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<DeploymentResponse>)> {
    let deployment = state
        .orchestrator
        .trigger(&principal, &ProjectId::new(id))
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(deployment_response(deployment, false)),
    ))
}

pub async fn list_deployments_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<DeploymentResponse>>> {
    let deployments = state
        .orchestrator
        .list_deployments(&principal, &ProjectId::new(id))
        .await?;
    Ok(Json(
        deployments
            .into_iter()
            .map(|d| deployment_response(d, false))
            .collect(),
    ))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentResponse>> {
    let deployment = state
        .orchestrator
        .get_deployment(&principal, &DeploymentId::new(id))
        .await?;
    Ok(Json(deployment_response(deployment, true)))
}

// ============================ CONTAINER CONTROL ================================= //

pub async fn restart_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    state
        .orchestrator
        .restart(&principal, &ProjectId::new(id))
        .await?;
    Ok(Json(MessageResponse {
        message: "Container restarted".to_string(),
    }))
}

pub async fn stop_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let stopped = state
        .orchestrator
        .stop(&principal, &ProjectId::new(id))
        .await?;
    let message = if stopped {
        "Container stopped"
    } else {
        "Container was not running"
    };
    Ok(Json(MessageResponse {
        message: message.to_string(),
    }))
}

pub async fn metrics_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<MetricsResponse>> {
    let stats = state.orchestrator.metrics(&principal, &id).await?;
    Ok(Json(MetricsResponse {
        cpu: stats.cpu,
        memory: stats.memory,
    }))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub lines: Option<usize>,
}

pub async fn container_logs_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<LogsResponse>> {
    let lines = query.lines.unwrap_or(DEFAULT_LOG_LINES);
    let logs = state.orchestrator.logs(&principal, &id, lines).await?;
    Ok(Json(LogsResponse { logs }))
}

// =============================== ENVIRONMENT ==================================== //

pub async fn list_env_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<EnvVarResponse>>> {
    let vars = state
        .orchestrator
        .list_env(&principal, &ProjectId::new(id))
        .await?;
    Ok(Json(vars.into_iter().map(env_var_response).collect()))
}

pub async fn create_env_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<String>,
    Json(request): Json<CreateEnvVarRequest>,
) -> ApiResult<(StatusCode, Json<EnvVarResponse>)> {
    let var = state
        .orchestrator
        .add_env(&principal, &ProjectId::new(id), &request.key, &request.value)
        .await?;
    Ok((StatusCode::CREATED, Json(env_var_response(var))))
}

pub async fn delete_env_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
    Path((id, env_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    state
        .orchestrator
        .delete_env(&principal, &ProjectId::new(id), &EnvVarId::new(env_id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============================== INFRASTRUCTURE ================================== //

pub async fn infra_stats_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
) -> ApiResult<Json<InfraStatsResponse>> {
    let stats = state.orchestrator.infra_stats(&principal).await?;
    Ok(Json(infra_stats_response(stats)))
}

pub async fn infra_containers_handler(
    State(state): State<Arc<ServerState>>,
    Authenticated(principal): Authenticated,
) -> ApiResult<Json<Vec<ContainerResponse>>> {
    let containers = state.orchestrator.containers(&principal).await?;
    Ok(Json(containers.into_iter().map(container_response).collect()))
}

// ================================ CONVERSION ==================================== //

fn project_response(orchestrator: &Orchestrator, project: &Project) -> ProjectResponse {
    ProjectResponse {
        id: project.id.to_string(),
        name: project.name.clone(),
        repository_url: project.repository_url.clone(),
        branch: project.branch.clone(),
        port: project.port,
        subdomain: project.subdomain.clone(),
        url: orchestrator.public_url(project),
        owner_id: project.owner_id.clone(),
        created_at: project.created_at,
        updated_at: project.updated_at,
    }
}

fn deployment_response(deployment: Deployment, with_logs: bool) -> DeploymentResponse {
    DeploymentResponse {
        id: deployment.id.to_string(),
        project_id: deployment.project_id.to_string(),
        status: deployment.status.to_string(),
        image_tag: deployment.image_tag,
        container_id: deployment.container_id,
        logs: with_logs.then_some(deployment.logs),
        created_at: deployment.created_at,
        updated_at: deployment.updated_at,
    }
}

fn env_var_response(var: MaskedEnvVar) -> EnvVarResponse {
    EnvVarResponse {
        id: var.id.to_string(),
        key: var.key,
        value: var.value,
        created_at: var.created_at,
    }
}

fn container_response(container: ContainerInfo) -> ContainerResponse {
    ContainerResponse {
        id: container.id,
        name: container.name,
        status: container.status,
        ports: container.ports,
        created_at: container.created_at,
    }
}

fn infra_stats_response(stats: InfraStats) -> InfraStatsResponse {
    InfraStatsResponse {
        runtime_reachable: stats.runtime_reachable,
        containers_total: stats.containers_total,
        containers_running: stats.containers_running,
        active_pipelines: stats.active_pipelines,
        host: HostStats {
            cpu_usage: stats.host.cpu_usage,
            memory_used: stats.host.memory_used,
            memory_total: stats.host.memory_total,
            uptime_secs: stats.host.uptime_secs,
            hostname: stats.host.hostname,
        },
    }
}
