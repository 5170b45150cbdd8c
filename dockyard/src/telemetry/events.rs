//! Platform events for billing and analytics consumers
//!
//! Events are fire-and-forget: emitting never blocks the caller and a failed
//! delivery is only logged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::ids::{DeploymentId, ProjectId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "deployment.queued")]
    DeploymentQueued,

    #[serde(rename = "deployment.healthy")]
    DeploymentHealthy,

    #[serde(rename = "deployment.failed")]
    DeploymentFailed,

    #[serde(rename = "project.deleted")]
    ProjectDeleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,

    pub project_id: ProjectId,

    pub owner_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_id: Option<DeploymentId>,

    /// Failure reason or public URL, depending on the kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    pub occurred_at: DateTime<Utc>,
}

impl PlatformEvent {
    pub fn new(kind: EventKind, project_id: ProjectId, owner_id: impl Into<String>) -> Self {
        Self {
            kind,
            project_id,
            owner_id: owner_id.into(),
            deployment_id: None,
            detail: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_deployment(mut self, deployment_id: DeploymentId) -> Self {
        self.deployment_id = Some(deployment_id);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Destination for platform events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PlatformEvent);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, event: PlatformEvent) {
        debug!("Dropping event {:?} for project {}", event.kind, event.project_id);
    }
}

/// POSTs each event as JSON to a collector endpoint
#[derive(Debug, Clone)]
pub struct HttpEventSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpEventSink {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl EventSink for HttpEventSink {
    fn emit(&self, event: PlatformEvent) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            let result = client
                .post(&endpoint)
                .json(&event)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);

            match result {
                Ok(_) => debug!("Delivered event {:?} to {}", event.kind, endpoint),
                Err(e) => warn!("Failed to deliver event {:?}: {}", event.kind, e),
            }
        });
    }
}
