//! Project and deployment persistence.
//!
//! The orchestrator only talks to the [`PlatformStore`] trait. An in-memory
//! implementation backs tests and ephemeral runs; [`JsonFileStore`] keeps the
//! same data in a JSON snapshot under the storage layout.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::{MemoryStore, StoreSnapshot};

use async_trait::async_trait;

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::PlatformResult;
use crate::models::deployment::Deployment;
use crate::models::env_var::EnvVar;
use crate::models::ids::{DeploymentId, EnvVarId, ProjectId};
use crate::models::project::Project;

/// Backend for projects, deployments and environment variables.
#[async_trait]
pub trait PlatformStore: Send + Sync {
    /// Insert a new project. Fails with a conflict if the subdomain is taken.
    async fn insert_project(&self, project: &Project) -> PlatformResult<()>;

    async fn get_project(&self, id: &ProjectId) -> PlatformResult<Option<Project>>;

    async fn find_project_by_subdomain(&self, subdomain: &str) -> PlatformResult<Option<Project>>;

    /// List projects, optionally restricted to one owner, oldest first.
    async fn list_projects(&self, owner_id: Option<&str>) -> PlatformResult<Vec<Project>>;

    /// Replace a project's scalar fields. Environment variables are untouched.
    async fn update_project(&self, project: &Project) -> PlatformResult<()>;

    /// Delete a project and its environment variables. Deployments are kept.
    async fn delete_project(&self, id: &ProjectId) -> PlatformResult<Option<Project>>;

    async fn insert_deployment(&self, deployment: &Deployment) -> PlatformResult<()>;

    async fn get_deployment(&self, id: &DeploymentId) -> PlatformResult<Option<Deployment>>;

    /// Deployments of a project, newest first.
    async fn list_deployments(&self, project_id: &ProjectId) -> PlatformResult<Vec<Deployment>>;

    /// Move a deployment to `status`, rejecting transitions outside the table.
    async fn update_deployment_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
    ) -> PlatformResult<Deployment>;

    async fn set_image_tag(&self, id: &DeploymentId, image_tag: &str) -> PlatformResult<()>;

    async fn set_container_id(&self, id: &DeploymentId, container_id: &str) -> PlatformResult<()>;

    /// Append one line to the deployment log as a single atomic operation.
    async fn append_log(&self, id: &DeploymentId, line: &str) -> PlatformResult<()>;

    /// Add an environment variable. Fails with a conflict if the key exists.
    async fn insert_env_var(&self, env_var: &EnvVar) -> PlatformResult<()>;

    async fn list_env_vars(&self, project_id: &ProjectId) -> PlatformResult<Vec<EnvVar>>;

    /// Returns whether a variable was removed.
    async fn delete_env_var(&self, project_id: &ProjectId, id: &EnvVarId) -> PlatformResult<bool>;

    /// Persist anything buffered. A no-op for stores that write through.
    async fn flush(&self) -> PlatformResult<()> {
        Ok(())
    }
}
