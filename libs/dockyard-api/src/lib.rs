//! Dockyard API models
//!
//! Request and response bodies exchanged over the Dockyard HTTP surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Version response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Plain acknowledgement for imperative container actions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Project creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub repository_url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Partial project update; absent fields are left untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Project response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub repository_url: String,
    pub branch: String,
    pub port: u16,
    pub subdomain: String,
    pub url: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Deployment response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub id: String,
    pub project_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    /// Persisted log text, only included when a single deployment is read
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Container resource usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsResponse {
    /// CPU usage percentage
    pub cpu: f64,
    /// Memory in use, in bytes
    pub memory: u64,
}

/// Container log tail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    pub logs: String,
}

/// Environment variable creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEnvVarRequest {
    pub key: String,
    pub value: String,
}

/// Environment variable as listed; `value` is always masked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarResponse {
    pub id: String,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
}

/// Server-sent event payload on the deployment log stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected { deployment_id: String },
    Log { message: String },
}

/// Container as reported by the runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerResponse {
    pub id: String,
    pub name: String,
    pub status: String,
    pub ports: String,
    pub created_at: String,
}

/// Host-level figures attached to the infrastructure summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostStats {
    pub cpu_usage: f32,
    pub memory_used: u64,
    pub memory_total: u64,
    pub uptime_secs: u64,
    pub hostname: String,
}

/// Infrastructure summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraStatsResponse {
    pub runtime_reachable: bool,
    pub containers_total: usize,
    pub containers_running: usize,
    pub active_pipelines: usize,
    pub host: HostStats,
}
