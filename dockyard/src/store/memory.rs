//! In-memory platform store.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::errors::{PlatformError, PlatformResult};
use crate::models::deployment::Deployment;
use crate::models::env_var::EnvVar;
use crate::models::ids::{DeploymentId, EnvVarId, ProjectId};
use crate::models::project::Project;

use super::PlatformStore;

/// Serializable copy of the whole store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub projects: Vec<Project>,
    pub deployments: Vec<Deployment>,
}

#[derive(Debug, Default)]
struct StoreData {
    projects: HashMap<ProjectId, Project>,
    deployments: HashMap<DeploymentId, Deployment>,
}

/// In-memory store. Data is lost when the process exits unless wrapped by
/// [`super::JsonFileStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<StoreData>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let data = StoreData {
            projects: snapshot
                .projects
                .into_iter()
                .map(|p| (p.id.clone(), p))
                .collect(),
            deployments: snapshot
                .deployments
                .into_iter()
                .map(|d| (d.id.clone(), d))
                .collect(),
        };
        Self {
            data: RwLock::new(data),
        }
    }

    /// Copy the current contents, ordered by creation time
    pub fn snapshot(&self) -> PlatformResult<StoreSnapshot> {
        let data = self.read()?;
        let mut projects: Vec<_> = data.projects.values().cloned().collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut deployments: Vec<_> = data.deployments.values().cloned().collect();
        deployments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(StoreSnapshot {
            projects,
            deployments,
        })
    }

    fn read(&self) -> PlatformResult<RwLockReadGuard<'_, StoreData>> {
        self.data
            .read()
            .map_err(|_| PlatformError::StorageError("lock poisoned".to_string()))
    }

    fn write(&self) -> PlatformResult<RwLockWriteGuard<'_, StoreData>> {
        self.data
            .write()
            .map_err(|_| PlatformError::StorageError("lock poisoned".to_string()))
    }

    fn with_deployment<T>(
        &self,
        id: &DeploymentId,
        f: impl FnOnce(&mut Deployment) -> PlatformResult<T>,
    ) -> PlatformResult<T> {
        let mut data = self.write()?;
        let deployment = data
            .deployments
            .get_mut(id)
            .ok_or_else(|| PlatformError::NotFound(format!("deployment {}", id)))?;
        f(deployment)
    }
}

#[async_trait]
impl PlatformStore for MemoryStore {
    async fn insert_project(&self, project: &Project) -> PlatformResult<()> {
        let mut data = self.write()?;

        if data.projects.contains_key(&project.id) {
            return Err(PlatformError::Conflict(format!(
                "project {} already exists",
                project.id
            )));
        }
        if data
            .projects
            .values()
            .any(|p| p.subdomain == project.subdomain)
        {
            return Err(PlatformError::Conflict(format!(
                "subdomain {} is taken",
                project.subdomain
            )));
        }

        data.projects.insert(project.id.clone(), project.clone());
        Ok(())
    }

    async fn get_project(&self, id: &ProjectId) -> PlatformResult<Option<Project>> {
        Ok(self.read()?.projects.get(id).cloned())
    }

    async fn find_project_by_subdomain(&self, subdomain: &str) -> PlatformResult<Option<Project>> {
        Ok(self
            .read()?
            .projects
            .values()
            .find(|p| p.subdomain == subdomain)
            .cloned())
    }

    async fn list_projects(&self, owner_id: Option<&str>) -> PlatformResult<Vec<Project>> {
        let data = self.read()?;
        let mut projects: Vec<_> = data
            .projects
            .values()
            .filter(|p| owner_id.map_or(true, |owner| p.owner_id == owner))
            .cloned()
            .collect();
        projects.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(projects)
    }

    async fn update_project(&self, project: &Project) -> PlatformResult<()> {
        let mut data = self.write()?;
        let existing = data
            .projects
            .get_mut(&project.id)
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", project.id)))?;

        let env_vars = std::mem::take(&mut existing.env_vars);
        *existing = Project {
            env_vars,
            ..project.clone()
        };
        Ok(())
    }

    async fn delete_project(&self, id: &ProjectId) -> PlatformResult<Option<Project>> {
        Ok(self.write()?.projects.remove(id))
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> PlatformResult<()> {
        let mut data = self.write()?;
        if data.deployments.contains_key(&deployment.id) {
            return Err(PlatformError::Conflict(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        data.deployments
            .insert(deployment.id.clone(), deployment.clone());
        Ok(())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> PlatformResult<Option<Deployment>> {
        Ok(self.read()?.deployments.get(id).cloned())
    }

    async fn list_deployments(&self, project_id: &ProjectId) -> PlatformResult<Vec<Deployment>> {
        let data = self.read()?;
        let mut deployments: Vec<_> = data
            .deployments
            .values()
            .filter(|d| &d.project_id == project_id)
            .cloned()
            .collect();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(deployments)
    }

    async fn update_deployment_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
    ) -> PlatformResult<Deployment> {
        self.with_deployment(id, |deployment| {
            if !deployment.status.can_transition_to(status) {
                return Err(PlatformError::InvalidTransition {
                    from: deployment.status,
                    to: status,
                });
            }
            deployment.status = status;
            deployment.updated_at = Utc::now();
            Ok(deployment.clone())
        })
    }

    async fn set_image_tag(&self, id: &DeploymentId, image_tag: &str) -> PlatformResult<()> {
        self.with_deployment(id, |deployment| {
            deployment.image_tag = Some(image_tag.to_string());
            deployment.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn set_container_id(&self, id: &DeploymentId, container_id: &str) -> PlatformResult<()> {
        self.with_deployment(id, |deployment| {
            deployment.container_id = Some(container_id.to_string());
            deployment.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn append_log(&self, id: &DeploymentId, line: &str) -> PlatformResult<()> {
        self.with_deployment(id, |deployment| {
            deployment.logs.push_str(line);
            deployment.logs.push('\n');
            Ok(())
        })
    }

    async fn insert_env_var(&self, env_var: &EnvVar) -> PlatformResult<()> {
        let mut data = self.write()?;
        let project = data
            .projects
            .get_mut(&env_var.project_id)
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", env_var.project_id)))?;

        if project.env_vars.iter().any(|v| v.key == env_var.key) {
            return Err(PlatformError::Conflict(format!(
                "environment variable {} already exists",
                env_var.key
            )));
        }
        project.env_vars.push(env_var.clone());
        Ok(())
    }

    async fn list_env_vars(&self, project_id: &ProjectId) -> PlatformResult<Vec<EnvVar>> {
        let data = self.read()?;
        let project = data
            .projects
            .get(project_id)
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", project_id)))?;
        Ok(project.env_vars.clone())
    }

    async fn delete_env_var(&self, project_id: &ProjectId, id: &EnvVarId) -> PlatformResult<bool> {
        let mut data = self.write()?;
        let project = data
            .projects
            .get_mut(project_id)
            .ok_or_else(|| PlatformError::NotFound(format!("project {}", project_id)))?;

        let before = project.env_vars.len();
        project.env_vars.retain(|v| &v.id != id);
        Ok(project.env_vars.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::project::NewProject;

    fn project(owner: &str) -> Project {
        Project::new(
            owner,
            NewProject {
                name: "demo".to_string(),
                repository_url: "https://example.com/demo.git".to_string(),
                branch: None,
                port: Some(8080),
            },
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_status_updates_follow_transition_table() {
        let store = MemoryStore::new();
        let deployment = Deployment::queued(ProjectId::new("p"));
        store.insert_deployment(&deployment).await.unwrap();

        let err = store
            .update_deployment_status(&deployment.id, DeploymentStatus::Healthy)
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::InvalidTransition { .. }));

        store
            .update_deployment_status(&deployment.id, DeploymentStatus::Building)
            .await
            .unwrap();
        store
            .update_deployment_status(&deployment.id, DeploymentStatus::Failed)
            .await
            .unwrap();
        assert!(store
            .update_deployment_status(&deployment.id, DeploymentStatus::Building)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_append_log_preserves_order() {
        let store = MemoryStore::new();
        let deployment = Deployment::queued(ProjectId::new("p"));
        store.insert_deployment(&deployment).await.unwrap();

        for i in 0..5 {
            store
                .append_log(&deployment.id, &format!("line {}", i))
                .await
                .unwrap();
        }

        let stored = store.get_deployment(&deployment.id).await.unwrap().unwrap();
        let lines: Vec<_> = stored.log_lines().collect();
        assert_eq!(lines, vec!["line 0", "line 1", "line 2", "line 3", "line 4"]);
    }

    #[tokio::test]
    async fn test_env_var_keys_are_unique_per_project() {
        let store = MemoryStore::new();
        let project = project("user-1");
        store.insert_project(&project).await.unwrap();

        let var = EnvVar::new(project.id.clone(), "API_KEY", "c1".to_string()).unwrap();
        store.insert_env_var(&var).await.unwrap();

        let dup = EnvVar::new(project.id.clone(), "API_KEY", "c2".to_string()).unwrap();
        assert!(matches!(
            store.insert_env_var(&dup).await,
            Err(PlatformError::Conflict(_))
        ));

        assert!(store.delete_env_var(&project.id, &var.id).await.unwrap());
        assert!(!store.delete_env_var(&project.id, &var.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_project_keeps_env_vars() {
        let store = MemoryStore::new();
        let mut project = project("user-1");
        store.insert_project(&project).await.unwrap();
        let var = EnvVar::new(project.id.clone(), "TOKEN", "c".to_string()).unwrap();
        store.insert_env_var(&var).await.unwrap();

        project.name = "renamed".to_string();
        store.update_project(&project).await.unwrap();

        let stored = store.get_project(&project.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "renamed");
        assert_eq!(stored.env_vars.len(), 1);
    }

    #[tokio::test]
    async fn test_list_projects_by_owner() {
        let store = MemoryStore::new();
        store.insert_project(&project("user-1")).await.unwrap();
        store.insert_project(&project("user-2")).await.unwrap();

        assert_eq!(store.list_projects(Some("user-1")).await.unwrap().len(), 1);
        assert_eq!(store.list_projects(None).await.unwrap().len(), 2);
    }
}
