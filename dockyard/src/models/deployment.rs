//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentStatus;
use crate::models::ids::{DeploymentId, ProjectId};

/// One attempt to build and run a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: DeploymentId,

    /// Project this deployment belongs to
    pub project_id: ProjectId,

    /// Current status
    pub status: DeploymentStatus,

    /// Image tag produced by the build step
    #[serde(default)]
    pub image_tag: Option<String>,

    /// Container started by the run step
    #[serde(default)]
    pub container_id: Option<String>,

    /// Accumulated pipeline log, one line per entry
    #[serde(default)]
    pub logs: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    /// A fresh row in the initial state
    pub fn queued(project_id: ProjectId) -> Self {
        let now = Utc::now();
        Self {
            id: DeploymentId::generate(),
            project_id,
            status: DeploymentStatus::Queued,
            image_tag: None,
            container_id: None,
            logs: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Persisted log split back into lines
    pub fn log_lines(&self) -> impl Iterator<Item = &str> {
        self.logs.lines()
    }
}
