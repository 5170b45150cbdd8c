//! Container models, read live from the runtime and never persisted

use serde::{Deserialize, Serialize};

/// A container as listed by the runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub id: String,

    /// Container name; equals the owning project's subdomain
    pub name: String,

    /// Runtime status string, e.g. "Up 3 minutes"
    pub status: String,

    /// Port mapping as reported by the runtime
    pub ports: String,

    pub created_at: String,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.status.starts_with("Up")
    }
}

/// Resource usage sample
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerStats {
    /// CPU usage percentage
    pub cpu: f64,

    /// Memory in use, in bytes
    pub memory: u64,
}
