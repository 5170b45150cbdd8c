//! Deployment orchestrator
//!
//! Entry point for everything a caller can do to a project: CRUD, deploy
//! triggers, container control, read-through metrics and environment
//! management. Every operation checks ownership before touching the store or
//! the runtime.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::authn::principal::Principal;
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm};
use crate::deploy::pipeline::{run_pipeline, PipelineContext};
use crate::errors::{PlatformError, PlatformResult};
use crate::models::container::{ContainerInfo, ContainerStats};
use crate::models::deployment::Deployment;
use crate::models::env_var::{EnvVar, MaskedEnvVar};
use crate::models::ids::{DeploymentId, EnvVarId, ProjectId};
use crate::models::project::{NewProject, Project, ProjectUpdate};
use crate::telemetry::{host_metrics, EventKind, HostMetrics, PlatformEvent};

/// Default number of container log lines returned
pub const DEFAULT_LOG_LINES: usize = 100;

/// Upper bound on requested container log lines
pub const MAX_LOG_LINES: usize = 10_000;

/// Aggregate infrastructure view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfraStats {
    pub runtime_reachable: bool,
    pub containers_total: usize,
    pub containers_running: usize,
    pub active_pipelines: usize,
    pub host: HostMetrics,
}

pub struct Orchestrator {
    ctx: PipelineContext,
    pipelines: Mutex<HashMap<DeploymentId, JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            ctx,
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Public URL of a project under the configured domain
    pub fn public_url(&self, project: &Project) -> String {
        project.public_url(&self.ctx.domain)
    }

    fn pipelines(&self) -> MutexGuard<'_, HashMap<DeploymentId, JoinHandle<()>>> {
        self.pipelines.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =============================== PROJECTS ================================ //

    pub async fn create_project(
        &self,
        principal: &Principal,
        request: NewProject,
    ) -> PlatformResult<Project> {
        let project = Project::new(&principal.user_id, request)?;
        self.ctx.store.insert_project(&project).await?;
        info!(
            "Created project {} ({}) for {}",
            project.id, project.subdomain, principal.user_id
        );
        Ok(project)
    }

    /// Own projects; admins see every project
    pub async fn list_projects(&self, principal: &Principal) -> PlatformResult<Vec<Project>> {
        let owner = if principal.is_admin() {
            None
        } else {
            Some(principal.user_id.as_str())
        };
        self.ctx.store.list_projects(owner).await
    }

    pub async fn get_project(
        &self,
        principal: &Principal,
        id: &ProjectId,
    ) -> PlatformResult<Project> {
        let project = self
            .ctx
            .store
            .get_project(id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", id)))?;
        authorize(principal, &project)?;
        Ok(project)
    }

    /// Look a project up by ID, falling back to its subdomain
    pub async fn resolve_project(
        &self,
        principal: &Principal,
        id_or_subdomain: &str,
    ) -> PlatformResult<Project> {
        let store = &self.ctx.store;
        let project = match store.get_project(&ProjectId::new(id_or_subdomain)).await? {
            Some(project) => Some(project),
            None => store.find_project_by_subdomain(id_or_subdomain).await?,
        }
        .ok_or_else(|| PlatformError::NotFound(format!("project {}", id_or_subdomain)))?;

        authorize(principal, &project)?;
        Ok(project)
    }

    pub async fn update_project(
        &self,
        principal: &Principal,
        id: &ProjectId,
        update: ProjectUpdate,
    ) -> PlatformResult<Project> {
        let mut project = self.get_project(principal, id).await?;
        project.apply(update)?;
        self.ctx.store.update_project(&project).await?;
        debug!("Updated project {}", project.id);
        Ok(project)
    }

    /// Delete a project, tearing its container down first. Deployments stay.
    pub async fn delete_project(&self, principal: &Principal, id: &ProjectId) -> PlatformResult<()> {
        let project = self.get_project(principal, id).await?;
        let name = project.container_name();

        if let Err(e) = self.ctx.runtime.stop_container(name).await {
            warn!("Failed to stop container {} of deleted project: {}", name, e);
        }
        if let Err(e) = self.ctx.runtime.remove_container(name).await {
            warn!("Failed to remove container {} of deleted project: {}", name, e);
        }

        self.ctx.store.delete_project(id).await?;
        self.ctx.store.flush().await?;
        self.ctx.events.emit(PlatformEvent::new(
            EventKind::ProjectDeleted,
            project.id.clone(),
            &project.owner_id,
        ));
        info!("Deleted project {} ({})", project.id, project.subdomain);
        Ok(())
    }

    // =============================== DEPLOYMENTS ================================ //

    /// Queue a deployment and start its pipeline in the background
    pub async fn trigger(
        &self,
        principal: &Principal,
        project_id: &ProjectId,
    ) -> PlatformResult<Deployment> {
        let project = self.get_project(principal, project_id).await?;
        project.ensure_deployable()?;

        let deployment = Deployment::queued(project.id.clone());
        self.ctx.store.insert_deployment(&deployment).await?;
        self.ctx.broadcaster.open(&deployment.id);
        self.ctx.events.emit(
            PlatformEvent::new(EventKind::DeploymentQueued, project.id.clone(), &project.owner_id)
                .with_deployment(deployment.id.clone()),
        );

        let handle = tokio::spawn(run_pipeline(
            self.ctx.clone(),
            project,
            deployment.id.clone(),
        ));
        let mut pipelines = self.pipelines();
        pipelines.retain(|_, handle| !handle.is_finished());
        pipelines.insert(deployment.id.clone(), handle);

        info!(
            "Queued deployment {} for project {}",
            deployment.id, deployment.project_id
        );
        Ok(deployment)
    }

    /// Deployments of a project, newest first
    pub async fn list_deployments(
        &self,
        principal: &Principal,
        project_id: &ProjectId,
    ) -> PlatformResult<Vec<Deployment>> {
        self.get_project(principal, project_id).await?;
        self.ctx.store.list_deployments(project_id).await
    }

    /// A deployment with its persisted log. Orphaned rows are admin-only.
    pub async fn get_deployment(
        &self,
        principal: &Principal,
        id: &DeploymentId,
    ) -> PlatformResult<Deployment> {
        let deployment = self
            .ctx
            .store
            .get_deployment(id)
            .await?
            .ok_or_else(|| PlatformError::NotFound(format!("deployment {}", id)))?;

        match self.ctx.store.get_project(&deployment.project_id).await? {
            Some(project) => authorize(principal, &project)?,
            None if principal.is_admin() => {}
            None => return Err(PlatformError::NotFound(format!("deployment {}", id))),
        }
        Ok(deployment)
    }

    /// Live log lines of a deployment. `None` when its pipeline has finished.
    pub async fn subscribe(
        &self,
        principal: &Principal,
        id: &DeploymentId,
    ) -> PlatformResult<Option<broadcast::Receiver<String>>> {
        self.get_deployment(principal, id).await?;
        Ok(self.ctx.broadcaster.subscribe(id))
    }

    /// Wait for a deployment's pipeline to finish
    pub async fn join(&self, id: &DeploymentId) {
        let handle = self.pipelines().remove(id);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Pipeline task for deployment {} ended abnormally: {}", id, e);
            }
        }
    }

    pub fn active_pipelines(&self) -> usize {
        self.pipelines()
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Abort every running pipeline and end its log streams
    pub fn shutdown(&self) {
        let mut pipelines = self.pipelines();
        for (id, handle) in pipelines.drain() {
            if !handle.is_finished() {
                warn!("Aborting pipeline for deployment {}", id);
                handle.abort();
            }
            self.ctx.broadcaster.close(&id);
        }
    }

    // =============================== CONTAINER CONTROL ================================ //

    /// Stop a project's container. Returns whether anything was running.
    pub async fn stop(&self, principal: &Principal, project_id: &ProjectId) -> PlatformResult<bool> {
        let project = self.get_project(principal, project_id).await?;
        let stopped = self
            .ctx
            .runtime
            .stop_container(project.container_name())
            .await?;
        if !stopped {
            debug!("No running container for project {}", project.id);
            return Ok(false);
        }

        let latest = self.ctx.store.list_deployments(&project.id).await?;
        if let Some(deployment) = latest.first() {
            let mut fsm = DeploymentFsm::from_status(deployment.status);
            if let Ok(next) = fsm.process(DeploymentEvent::Stop) {
                self.ctx
                    .store
                    .update_deployment_status(&deployment.id, next)
                    .await?;
                self.ctx.store.flush().await?;
            }
        }

        info!("Stopped container of project {}", project.id);
        Ok(true)
    }

    pub async fn restart(&self, principal: &Principal, project_id: &ProjectId) -> PlatformResult<()> {
        let project = self.get_project(principal, project_id).await?;
        self.ctx
            .runtime
            .restart_container(project.container_name())
            .await?;
        info!("Restarted container of project {}", project.id);
        Ok(())
    }

    /// Current resource usage; zeros whenever the runtime cannot tell
    pub async fn metrics(
        &self,
        principal: &Principal,
        id_or_subdomain: &str,
    ) -> PlatformResult<ContainerStats> {
        let project = self.resolve_project(principal, id_or_subdomain).await?;
        match self.ctx.runtime.stats(project.container_name()).await {
            Ok(stats) => Ok(stats),
            Err(e) => {
                debug!("No stats for {}: {}", project.subdomain, e);
                Ok(ContainerStats::default())
            }
        }
    }

    /// Tail of the container's output; empty whenever the runtime cannot tell
    pub async fn logs(
        &self,
        principal: &Principal,
        id_or_subdomain: &str,
        lines: usize,
    ) -> PlatformResult<String> {
        let project = self.resolve_project(principal, id_or_subdomain).await?;
        let lines = lines.clamp(1, MAX_LOG_LINES);
        match self.ctx.runtime.logs(project.container_name(), lines).await {
            Ok(logs) => Ok(logs),
            Err(e) => {
                debug!("No logs for {}: {}", project.subdomain, e);
                Ok(String::new())
            }
        }
    }

    // =============================== ENVIRONMENT ================================ //

    pub async fn list_env(
        &self,
        principal: &Principal,
        project_id: &ProjectId,
    ) -> PlatformResult<Vec<MaskedEnvVar>> {
        self.get_project(principal, project_id).await?;
        let vars = self.ctx.store.list_env_vars(project_id).await?;
        Ok(vars.iter().map(MaskedEnvVar::from).collect())
    }

    /// Encrypt and store a variable. Takes effect on the next deployment.
    pub async fn add_env(
        &self,
        principal: &Principal,
        project_id: &ProjectId,
        key: &str,
        value: &str,
    ) -> PlatformResult<MaskedEnvVar> {
        self.get_project(principal, project_id).await?;
        let ciphertext = self.ctx.codec.encrypt(value)?;
        let var = EnvVar::new(project_id.clone(), key.trim(), ciphertext)?;
        self.ctx.store.insert_env_var(&var).await?;
        self.ctx.store.flush().await?;
        debug!("Added env var {} to project {}", var.key, project_id);
        Ok(MaskedEnvVar::from(&var))
    }

    pub async fn delete_env(
        &self,
        principal: &Principal,
        project_id: &ProjectId,
        env_id: &EnvVarId,
    ) -> PlatformResult<()> {
        self.get_project(principal, project_id).await?;
        if !self.ctx.store.delete_env_var(project_id, env_id).await? {
            return Err(PlatformError::NotFound(format!("env var {}", env_id)));
        }
        self.ctx.store.flush().await?;
        Ok(())
    }

    // =============================== INFRASTRUCTURE ================================ //

    pub async fn containers(&self, principal: &Principal) -> PlatformResult<Vec<ContainerInfo>> {
        require_admin(principal)?;
        self.ctx.runtime.list_containers().await
    }

    pub async fn infra_stats(&self, principal: &Principal) -> PlatformResult<InfraStats> {
        require_admin(principal)?;

        let runtime_reachable = self.ctx.runtime.health_check().await;
        let containers = if runtime_reachable {
            self.ctx.runtime.list_containers().await.unwrap_or_else(|e| {
                warn!("Failed to list containers: {}", e);
                Vec::new()
            })
        } else {
            Vec::new()
        };

        Ok(InfraStats {
            runtime_reachable,
            containers_total: containers.len(),
            containers_running: containers.iter().filter(|c| c.is_running()).count(),
            active_pipelines: self.active_pipelines(),
            host: host_metrics().await,
        })
    }
}

fn authorize(principal: &Principal, project: &Project) -> PlatformResult<()> {
    if project.is_accessible_by(principal) {
        Ok(())
    } else {
        Err(PlatformError::Forbidden(format!(
            "project {} belongs to another user",
            project.id
        )))
    }
}

fn require_admin(principal: &Principal) -> PlatformResult<()> {
    if principal.is_admin() {
        Ok(())
    } else {
        Err(PlatformError::Forbidden("admin role required".to_string()))
    }
}
