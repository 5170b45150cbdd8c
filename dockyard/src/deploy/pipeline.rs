//! Build-and-run pipeline for one deployment
//!
//! Runs detached from the request that triggered it. Every outcome, including
//! a panic inside a step, ends with the deployment row in a settled state,
//! with one exception: if the first `QUEUED -> BUILDING` write fails the row
//! cannot legally move to `FAILED` and stays `QUEUED`. The failure is still
//! appended to the deployment log.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tracing::{error, info, warn};

use crate::deploy::broadcaster::{DeploymentLogWriter, LogBroadcaster};
use crate::deploy::fsm::{DeploymentEvent, DeploymentFsm, DeploymentStatus};
use crate::deploy::runtime::{routing_labels, ContainerRuntime, ResourceLimits, RunSpec};
use crate::errors::{PlatformError, PlatformResult};
use crate::filesys::dir::Dir;
use crate::models::ids::DeploymentId;
use crate::models::project::Project;
use crate::secrets::SecretsCodec;
use crate::store::PlatformStore;
use crate::telemetry::{EventKind, EventSink, PlatformEvent};

/// Shared collaborators of every pipeline run
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn PlatformStore>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub codec: Arc<dyn SecretsCodec>,
    pub broadcaster: Arc<LogBroadcaster>,
    pub events: Arc<dyn EventSink>,

    /// Parent of the per-deployment checkout directories
    pub build_root: Dir,

    /// Apex domain project subdomains hang off
    pub domain: String,

    pub limits: ResourceLimits,
}

/// Drive a queued deployment to `HEALTHY` or `FAILED`
pub async fn run_pipeline(ctx: PipelineContext, project: Project, deployment_id: DeploymentId) {
    info!(
        "Pipeline started for deployment {} of project {}",
        deployment_id, project.id
    );

    let writer = ctx.broadcaster.writer(&deployment_id);
    let build_dir = ctx
        .build_root
        .subdir(&format!("{}-{}", project.subdomain, deployment_id));
    let mut fsm = DeploymentFsm::new();

    let outcome = AssertUnwindSafe(execute(
        &ctx,
        &project,
        &deployment_id,
        &build_dir,
        &writer,
        &mut fsm,
    ))
    .catch_unwind()
    .await;

    remove_build_dir(&build_dir).await;

    let result = match outcome {
        Ok(result) => result,
        Err(panic) => Err(PlatformError::Internal(format!(
            "pipeline panicked: {}",
            panic_message(panic.as_ref())
        ))),
    };

    match result {
        Ok(()) => {
            let url = project.public_url(&ctx.domain);
            writer.line(format!("Deployment is live at {}", url));
            writer.flush().await;
            settle(&ctx, &deployment_id, &mut fsm, DeploymentEvent::Ready).await;
            ctx.events.emit(
                PlatformEvent::new(EventKind::DeploymentHealthy, project.id.clone(), &project.owner_id)
                    .with_deployment(deployment_id.clone())
                    .with_detail(url),
            );
        }
        Err(e) => {
            writer.line(format!("Deployment failed: {}", e));
            writer.flush().await;
            settle(
                &ctx,
                &deployment_id,
                &mut fsm,
                DeploymentEvent::Fail(e.to_string()),
            )
            .await;
            ctx.events.emit(
                PlatformEvent::new(EventKind::DeploymentFailed, project.id.clone(), &project.owner_id)
                    .with_deployment(deployment_id.clone())
                    .with_detail(e.to_string()),
            );
        }
    }

    if let Err(e) = ctx.store.flush().await {
        error!("Failed to flush store after deployment {}: {}", deployment_id, e);
    }
    ctx.broadcaster.close(&deployment_id);
    match fsm.error() {
        Some(e) => warn!(
            "Pipeline finished for deployment {} with status {}: {}",
            deployment_id,
            fsm.status(),
            e
        ),
        None => info!(
            "Pipeline finished for deployment {} with status {}",
            deployment_id,
            fsm.status()
        ),
    }
}

async fn execute(
    ctx: &PipelineContext,
    project: &Project,
    deployment_id: &DeploymentId,
    build_dir: &Dir,
    writer: &DeploymentLogWriter,
    fsm: &mut DeploymentFsm,
) -> PlatformResult<()> {
    advance(ctx, deployment_id, fsm, DeploymentEvent::StartBuild).await?;
    writer.line(format!(
        "Starting deployment {} of {} ({})",
        deployment_id, project.name, project.branch
    ));

    if !ctx.runtime.health_check().await {
        return Err(PlatformError::RuntimeUnavailable(
            "container runtime is not reachable".to_string(),
        ));
    }
    ctx.runtime.ensure_network().await?;

    ctx.build_root.create().await?;
    writer.line(format!(
        "Cloning {} (branch {})",
        project.repository_url, project.branch
    ));
    ctx.runtime
        .clone_repository(&project.repository_url, &project.branch, build_dir.path())
        .await?;

    writer.line("Building image");
    let on_line = |line: &str| writer.line(line);
    let image_tag = ctx
        .runtime
        .build_image(build_dir.path(), &project.subdomain, &on_line)
        .await?;
    ctx.store.set_image_tag(deployment_id, &image_tag).await?;
    writer.line(format!("Built image {}", image_tag));

    advance(ctx, deployment_id, fsm, DeploymentEvent::BuildSucceeded).await?;
    let name = project.container_name();
    if ctx.runtime.stop_container(name).await? {
        writer.line(format!("Stopped previous container {}", name));
    }
    ctx.runtime.remove_container(name).await?;

    let host = project.host(&ctx.domain);
    let spec = RunSpec {
        name: name.to_string(),
        image: image_tag,
        port: project.port,
        env: decrypt_env(ctx, project).await?,
        limits: ctx.limits,
        labels: routing_labels(name, &host, project.port, project.id.as_str()),
    };
    let container_id = ctx.runtime.run_container(&spec).await?;
    drop(spec);

    ctx.store.set_container_id(deployment_id, &container_id).await?;
    writer.line(format!(
        "Started container {}",
        &container_id[..container_id.len().min(12)]
    ));
    Ok(())
}

/// Move the local FSM and the persisted row together
async fn advance(
    ctx: &PipelineContext,
    deployment_id: &DeploymentId,
    fsm: &mut DeploymentFsm,
    event: DeploymentEvent,
) -> PlatformResult<DeploymentStatus> {
    let next = fsm.process(event)?;
    ctx.store
        .update_deployment_status(deployment_id, next)
        .await?;
    Ok(next)
}

/// Write a terminal status, logging instead of failing
async fn settle(
    ctx: &PipelineContext,
    deployment_id: &DeploymentId,
    fsm: &mut DeploymentFsm,
    event: DeploymentEvent,
) {
    if let Err(e) = advance(ctx, deployment_id, fsm, event).await {
        error!(
            "Failed to settle deployment {} from {}: {}",
            deployment_id,
            fsm.status(),
            e
        );
    }
}

async fn decrypt_env(
    ctx: &PipelineContext,
    project: &Project,
) -> PlatformResult<HashMap<String, String>> {
    let env_vars = ctx.store.list_env_vars(&project.id).await?;
    env_vars
        .iter()
        .map(|var| Ok((var.key.clone(), ctx.codec.decrypt(&var.ciphertext)?)))
        .collect()
}

async fn remove_build_dir(build_dir: &Dir) {
    if let Err(e) = build_dir.delete().await {
        warn!(
            "Failed to remove build directory {}: {}",
            build_dir.path().display(),
            e
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
