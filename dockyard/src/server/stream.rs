//! Live deployment log stream over server-sent events

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use dockyard_api::StreamEvent;
use futures::stream::{self, Stream, StreamExt};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, warn};

use crate::models::ids::DeploymentId;
use crate::server::auth::StreamAuthenticated;
use crate::server::errors::ApiResult;
use crate::server::state::ServerState;

/// Comment line sent to keep idle connections open
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub async fn deployment_stream_handler(
    State(state): State<Arc<ServerState>>,
    StreamAuthenticated(principal): StreamAuthenticated,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let deployment_id = DeploymentId::new(id);
    let receiver = state
        .orchestrator
        .subscribe(&principal, &deployment_id)
        .await?;
    if receiver.is_none() {
        debug!("Deployment {} has no live topic; stream ends after connect", deployment_id);
    }

    Ok(Sse::new(log_event_stream(deployment_id, receiver)).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    ))
}

/// `connected` first, then one `log` event per line until the topic closes
pub fn log_event_stream(
    deployment_id: DeploymentId,
    receiver: Option<Receiver<String>>,
) -> impl Stream<Item = Result<Event, axum::Error>> + Send {
    let connected = stream::once(async move {
        Event::default().json_data(StreamEvent::Connected {
            deployment_id: deployment_id.to_string(),
        })
    });

    let lines = stream::unfold(receiver, |receiver| async move {
        let mut rx = receiver?;
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let event = Event::default().json_data(StreamEvent::Log { message });
                    return Some((event, Some(rx)));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Log stream subscriber lagged; skipped {} lines", skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    connected.chain(lines)
}
