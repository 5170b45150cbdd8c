//! Per-deployment log fan-out
//!
//! Every published line is first appended to the persisted deployment log and
//! then sent to whoever is subscribed to that deployment's topic. Subscribers
//! only see lines published after they attached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::errors::PlatformResult;
use crate::models::ids::DeploymentId;
use crate::store::PlatformStore;

/// Lines buffered per subscriber before it starts lagging
pub const DEFAULT_TOPIC_CAPACITY: usize = 1024;

/// Topic registry keyed by deployment ID
pub struct LogBroadcaster {
    store: Arc<dyn PlatformStore>,
    topics: Mutex<HashMap<DeploymentId, broadcast::Sender<String>>>,
    capacity: usize,
}

impl LogBroadcaster {
    pub fn new(store: Arc<dyn PlatformStore>) -> Self {
        Self::with_capacity(store, DEFAULT_TOPIC_CAPACITY)
    }

    pub fn with_capacity(store: Arc<dyn PlatformStore>, capacity: usize) -> Self {
        Self {
            store,
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<DeploymentId, broadcast::Sender<String>>> {
        // The map holds no invariant a panicking holder could break
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the topic for a deployment. Opening an open topic is a no-op.
    pub fn open(&self, id: &DeploymentId) {
        let capacity = self.capacity;
        self.topics()
            .entry(id.clone())
            .or_insert_with(|| broadcast::channel(capacity).0);
        debug!("Opened log topic for deployment {}", id);
    }

    /// Drop the topic. Subscribers drain what was already sent, then end.
    pub fn close(&self, id: &DeploymentId) {
        if self.topics().remove(id).is_some() {
            debug!("Closed log topic for deployment {}", id);
        }
    }

    pub fn is_open(&self, id: &DeploymentId) -> bool {
        self.topics().contains_key(id)
    }

    /// Persist one line and notify live subscribers
    pub async fn publish(&self, id: &DeploymentId, line: &str) -> PlatformResult<()> {
        self.store.append_log(id, line).await?;

        let sender = self.topics().get(id).cloned();
        if let Some(sender) = sender {
            // No receivers is fine: nobody is watching right now
            let _ = sender.send(line.to_string());
        }
        Ok(())
    }

    /// Attach to a deployment's live lines. `None` once the topic is closed.
    pub fn subscribe(&self, id: &DeploymentId) -> Option<broadcast::Receiver<String>> {
        self.topics().get(id).map(broadcast::Sender::subscribe)
    }

    /// Start the single writer through which a pipeline publishes its lines
    pub fn writer(self: &Arc<Self>, id: &DeploymentId) -> DeploymentLogWriter {
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let broadcaster = Arc::clone(self);
        let deployment_id = id.clone();

        let task = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if let Err(e) = broadcaster.publish(&deployment_id, &line).await {
                    warn!(
                        "Failed to persist log line for deployment {}: {}",
                        deployment_id, e
                    );
                }
            }
        });

        DeploymentLogWriter { tx, task }
    }
}

/// Ordered, non-blocking log sink for one deployment.
///
/// Lines are published in the order they are handed over, by one task, so a
/// synchronous callback (build output) and async pipeline steps can share it.
pub struct DeploymentLogWriter {
    tx: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl DeploymentLogWriter {
    /// Queue a line for publication
    pub fn line(&self, line: impl Into<String>) {
        if self.tx.send(line.into()).is_err() {
            warn!("Log writer task is gone; dropping line");
        }
    }

    /// Wait until every queued line has been published
    pub async fn flush(self) {
        let DeploymentLogWriter { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            warn!("Log writer task ended abnormally: {}", e);
        }
    }
}
