//! JSON snapshot store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::PlatformResult;
use crate::filesys::file::File;
use crate::models::deployment::Deployment;
use crate::models::env_var::EnvVar;
use crate::models::ids::{DeploymentId, EnvVarId, ProjectId};
use crate::models::project::Project;

use super::{MemoryStore, PlatformStore, StoreSnapshot};

/// A [`MemoryStore`] mirrored to a JSON file.
///
/// Every mutation rewrites the snapshot atomically, except log appends: those
/// only mark the snapshot dirty and ride along with the next write or
/// [`PlatformStore::flush`]. A pipeline always writes a status after its last
/// log line, so settled deployments are persisted with their full log.
pub struct JsonFileStore {
    memory: MemoryStore,
    file: File,
    dirty: AtomicBool,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Load the snapshot at `file`, or start empty if it does not exist
    pub async fn open(file: File) -> PlatformResult<Self> {
        let memory = if file.exists().await {
            let snapshot: StoreSnapshot = file.read_json().await?;
            info!(
                "Loaded {} projects and {} deployments from {}",
                snapshot.projects.len(),
                snapshot.deployments.len(),
                file.path().display()
            );
            MemoryStore::from_snapshot(snapshot)
        } else {
            MemoryStore::new()
        };

        Ok(Self {
            memory,
            file,
            dirty: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    async fn persist(&self) -> PlatformResult<()> {
        let _guard = self.write_lock.lock().await;
        self.dirty.store(false, Ordering::SeqCst);

        let snapshot = self.memory.snapshot()?;
        let contents = serde_json::to_vec_pretty(&snapshot)?;
        self.file.write_atomic(&contents).await?;
        debug!("Persisted store snapshot to {}", self.file.path().display());
        Ok(())
    }
}

#[async_trait]
impl PlatformStore for JsonFileStore {
    async fn insert_project(&self, project: &Project) -> PlatformResult<()> {
        self.memory.insert_project(project).await?;
        self.persist().await
    }

    async fn get_project(&self, id: &ProjectId) -> PlatformResult<Option<Project>> {
        self.memory.get_project(id).await
    }

    async fn find_project_by_subdomain(&self, subdomain: &str) -> PlatformResult<Option<Project>> {
        self.memory.find_project_by_subdomain(subdomain).await
    }

    async fn list_projects(&self, owner_id: Option<&str>) -> PlatformResult<Vec<Project>> {
        self.memory.list_projects(owner_id).await
    }

    async fn update_project(&self, project: &Project) -> PlatformResult<()> {
        self.memory.update_project(project).await?;
        self.persist().await
    }

    async fn delete_project(&self, id: &ProjectId) -> PlatformResult<Option<Project>> {
        let deleted = self.memory.delete_project(id).await?;
        if deleted.is_some() {
            self.persist().await?;
        }
        Ok(deleted)
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> PlatformResult<()> {
        self.memory.insert_deployment(deployment).await?;
        self.persist().await
    }

    async fn get_deployment(&self, id: &DeploymentId) -> PlatformResult<Option<Deployment>> {
        self.memory.get_deployment(id).await
    }

    async fn list_deployments(&self, project_id: &ProjectId) -> PlatformResult<Vec<Deployment>> {
        self.memory.list_deployments(project_id).await
    }

    async fn update_deployment_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
    ) -> PlatformResult<Deployment> {
        let deployment = self.memory.update_deployment_status(id, status).await?;
        self.persist().await?;
        Ok(deployment)
    }

    async fn set_image_tag(&self, id: &DeploymentId, image_tag: &str) -> PlatformResult<()> {
        self.memory.set_image_tag(id, image_tag).await?;
        self.persist().await
    }

    async fn set_container_id(&self, id: &DeploymentId, container_id: &str) -> PlatformResult<()> {
        self.memory.set_container_id(id, container_id).await?;
        self.persist().await
    }

    async fn append_log(&self, id: &DeploymentId, line: &str) -> PlatformResult<()> {
        self.memory.append_log(id, line).await?;
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_env_var(&self, env_var: &EnvVar) -> PlatformResult<()> {
        self.memory.insert_env_var(env_var).await?;
        self.persist().await
    }

    async fn list_env_vars(&self, project_id: &ProjectId) -> PlatformResult<Vec<EnvVar>> {
        self.memory.list_env_vars(project_id).await
    }

    async fn delete_env_var(&self, project_id: &ProjectId, id: &EnvVarId) -> PlatformResult<bool> {
        let deleted = self.memory.delete_env_var(project_id, id).await?;
        if deleted {
            self.persist().await?;
        }
        Ok(deleted)
    }

    async fn flush(&self) -> PlatformResult<()> {
        if self.dirty.load(Ordering::SeqCst) {
            self.persist().await?;
        }
        Ok(())
    }
}
