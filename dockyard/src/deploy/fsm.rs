//! Finite State Machine for deployment status

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::PlatformError;

/// Deployment status
///
/// `Queued` is the only initial state. `Failed` and `Stopped` are terminal;
/// `Healthy` only ever moves on to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeploymentStatus {
    /// Row created, pipeline not started yet
    Queued,

    /// Cloning and building the image
    Building,

    /// Replacing the running container
    Deploying,

    /// Container started successfully
    Healthy,

    /// A pipeline step failed
    Failed,

    /// Container stopped by its owner after a healthy deploy
    Stopped,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Queued => "QUEUED",
            DeploymentStatus::Building => "BUILDING",
            DeploymentStatus::Deploying => "DEPLOYING",
            DeploymentStatus::Healthy => "HEALTHY",
            DeploymentStatus::Failed => "FAILED",
            DeploymentStatus::Stopped => "STOPPED",
        }
    }

    /// The transition table. Everything not listed here is rejected.
    pub fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Queued, Building)
                | (Building, Deploying)
                | (Building, Failed)
                | (Deploying, Healthy)
                | (Deploying, Failed)
                | (Healthy, Stopped)
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(DeploymentStatus::Queued),
            "BUILDING" => Ok(DeploymentStatus::Building),
            "DEPLOYING" => Ok(DeploymentStatus::Deploying),
            "HEALTHY" => Ok(DeploymentStatus::Healthy),
            "FAILED" => Ok(DeploymentStatus::Failed),
            "STOPPED" => Ok(DeploymentStatus::Stopped),
            _ => Err(format!("Invalid deployment status: {}", s)),
        }
    }
}

/// Deployment event
#[derive(Debug, Clone)]
pub enum DeploymentEvent {
    /// Pipeline picked the deployment up
    StartBuild,

    /// Image built, moving on to the container swap
    BuildSucceeded,

    /// New container is running
    Ready,

    /// A step failed
    Fail(String),

    /// Owner stopped the container
    Stop,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    status: DeploymentStatus,
    error: Option<String>,
}

impl DeploymentFsm {
    /// Create a new FSM in queued state
    pub fn new() -> Self {
        Self::from_status(DeploymentStatus::Queued)
    }

    /// Resume an FSM from a persisted status
    pub fn from_status(status: DeploymentStatus) -> Self {
        Self {
            status,
            error: None,
        }
    }

    /// Get current status
    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and return the new status
    pub fn process(&mut self, event: DeploymentEvent) -> Result<DeploymentStatus, PlatformError> {
        let next = match &event {
            DeploymentEvent::StartBuild => DeploymentStatus::Building,
            DeploymentEvent::BuildSucceeded => DeploymentStatus::Deploying,
            DeploymentEvent::Ready => DeploymentStatus::Healthy,
            DeploymentEvent::Fail(_) => DeploymentStatus::Failed,
            DeploymentEvent::Stop => DeploymentStatus::Stopped,
        };

        if !self.status.can_transition_to(next) {
            return Err(PlatformError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        if let DeploymentEvent::Fail(err) = event {
            self.error = Some(err);
        }
        self.status = next;
        Ok(next)
    }
}

impl Default for DeploymentFsm {
    fn default() -> Self {
        Self::new()
    }
}
