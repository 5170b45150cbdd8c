//! Container runtime boundary
//!
//! Everything the orchestrator needs from the container engine goes through
//! [`ContainerRuntime`], so a CLI-driven adapter and an API-client adapter are
//! interchangeable.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use async_trait::async_trait;

use crate::errors::PlatformResult;
use crate::models::container::{ContainerInfo, ContainerStats};

/// Label marking containers owned by this platform
pub const MANAGED_LABEL: &str = "dockyard.managed";

/// Label carrying the owning project ID
pub const PROJECT_LABEL: &str = "dockyard.project";

/// Receives build output one line at a time, as it is produced
pub type LogLineFn<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Static resource limits applied to every container
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    /// CPU cores, fractional allowed
    pub cpus: f64,

    /// Memory limit in MiB
    pub memory_mb: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpus: 0.5,
            memory_mb: 512,
        }
    }
}

/// Everything needed to start a project container
#[derive(Clone)]
pub struct RunSpec {
    /// Container name, always the project subdomain
    pub name: String,

    pub image: String,

    /// Port the application listens on
    pub port: u16,

    /// Decrypted environment; lives only as long as the run call
    pub env: HashMap<String, String>,

    pub limits: ResourceLimits,

    pub labels: BTreeMap<String, String>,
}

impl fmt::Debug for RunSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&String> = self.env.keys().collect();
        f.debug_struct("RunSpec")
            .field("name", &self.name)
            .field("image", &self.image)
            .field("port", &self.port)
            .field("env_keys", &env_keys)
            .field("limits", &self.limits)
            .field("labels", &self.labels)
            .finish()
    }
}

/// Reverse-proxy labels: one container name, one subdomain, one routing rule
pub fn routing_labels(
    name: &str,
    host: &str,
    port: u16,
    project_id: &str,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(PROJECT_LABEL.to_string(), project_id.to_string());
    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(
        format!("traefik.http.routers.{}.rule", name),
        format!("Host(`{}`)", host),
    );
    labels.insert(
        format!("traefik.http.services.{}.loadbalancer.server.port", name),
        port.to_string(),
    );
    labels
}

/// Container runtime operations. Each call is independently fallible.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the runtime daemon answers. Never errors.
    async fn health_check(&self) -> bool;

    /// Create the shared platform network if it does not exist yet
    async fn ensure_network(&self) -> PlatformResult<()>;

    /// Clone `branch` of `url` into `dest`
    async fn clone_repository(&self, url: &str, branch: &str, dest: &Path) -> PlatformResult<()>;

    /// Build an image from `context`, pushing every output line to `on_line`.
    /// Returns the freshly tagged image reference.
    async fn build_image(
        &self,
        context: &Path,
        name_hint: &str,
        on_line: LogLineFn<'_>,
    ) -> PlatformResult<String>;

    /// Start a container on the shared network. Returns its ID.
    async fn run_container(&self, spec: &RunSpec) -> PlatformResult<String>;

    /// Stop a running container. `Ok(false)` when it is absent or already exited.
    async fn stop_container(&self, name: &str) -> PlatformResult<bool>;

    /// Remove a container; absent containers are not an error
    async fn remove_container(&self, name: &str) -> PlatformResult<()>;

    async fn restart_container(&self, name: &str) -> PlatformResult<()>;

    /// Containers carrying the managed label
    async fn list_containers(&self) -> PlatformResult<Vec<ContainerInfo>>;

    async fn stats(&self, name: &str) -> PlatformResult<ContainerStats>;

    async fn logs(&self, name: &str, lines: usize) -> PlatformResult<String>;
}
