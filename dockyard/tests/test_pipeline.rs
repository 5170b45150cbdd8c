//! Deployment pipeline integration tests

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use dockyard::deploy::broadcaster::LogBroadcaster;
use dockyard::deploy::fsm::DeploymentStatus;
use dockyard::deploy::pipeline::{run_pipeline, PipelineContext};
use dockyard::deploy::runtime::ResourceLimits;
use dockyard::errors::PlatformError;
use dockyard::filesys::dir::Dir;
use dockyard::models::container::ContainerStats;
use dockyard::models::deployment::Deployment;
use dockyard::models::project::Project;
use dockyard::secrets::AesGcmCodec;
use dockyard::store::{MemoryStore, PlatformStore};
use dockyard::telemetry::NoopEventSink;
use secrecy::SecretString;
use dockyard::telemetry::EventKind;
use tokio::sync::broadcast::error::RecvError;

use common::{alice, bob, new_project, FakeRuntime, Harness, StatusFaultStore, DOMAIN, SECRET_KEY};

#[tokio::test]
async fn test_successful_deployment_becomes_healthy() {
    let harness = Harness::new();
    let owner = alice();
    let project = harness.project(&owner).await;
    harness
        .orchestrator
        .add_env(&owner, &project.id, "DATABASE_URL", "postgres://db/blog")
        .await
        .unwrap();

    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    assert_eq!(queued.status, DeploymentStatus::Queued);
    harness.orchestrator.join(&queued.id).await;

    let deployment = harness.store.get_deployment(&queued.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Healthy);
    assert!(deployment.image_tag.as_deref().unwrap().starts_with("fake/"));
    assert!(deployment.container_id.is_some());

    let last = deployment.log_lines().last().unwrap().to_string();
    assert_eq!(
        last,
        format!("Deployment is live at https://{}.{}", project.subdomain, DOMAIN)
    );

    let container = harness.runtime.container(&project.subdomain).unwrap();
    assert!(container.running);
    assert_eq!(container.env["DATABASE_URL"], "postgres://db/blog");

    assert_eq!(harness.leftover_builds(), 0);
    assert_eq!(
        harness.events.kinds(),
        [EventKind::DeploymentQueued, EventKind::DeploymentHealthy]
    );
    assert_eq!(harness.orchestrator.active_pipelines(), 0);
    assert!(!harness.broadcaster.is_open(&queued.id));
}

#[tokio::test]
async fn test_unreachable_repository_fails_without_container() {
    let harness = Harness::new();
    *harness.runtime.clone_error.lock().unwrap() =
        Some("fatal: repository not found".to_string());
    let owner = alice();
    let project = harness.project(&owner).await;

    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&queued.id).await;

    let deployment = harness.store.get_deployment(&queued.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.logs.contains("fatal: repository not found"));
    assert!(deployment.image_tag.is_none());
    assert!(!harness.runtime.called("run_container"));
    assert!(harness.runtime.container(&project.subdomain).is_none());
    assert_eq!(harness.leftover_builds(), 0);
    assert_eq!(
        harness.events.kinds(),
        [EventKind::DeploymentQueued, EventKind::DeploymentFailed]
    );
}

#[tokio::test]
async fn test_unreachable_runtime_fails_before_clone() {
    let harness = Harness::new();
    harness.runtime.reachable.store(false, Ordering::SeqCst);
    let owner = alice();
    let project = harness.project(&owner).await;

    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&queued.id).await;

    let deployment = harness.store.get_deployment(&queued.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.logs.contains("not reachable"));
    assert!(!harness.runtime.called("clone_repository"));
}

#[tokio::test]
async fn test_build_failure_keeps_build_output() {
    let harness = Harness::new();
    harness
        .runtime
        .set_build_lines(&["#5 RUN npm ci", "npm ERR! missing script: build"]);
    *harness.runtime.build_error.lock().unwrap() = Some("exit status 1".to_string());
    let owner = alice();
    let project = harness.project(&owner).await;

    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&queued.id).await;

    let deployment = harness.store.get_deployment(&queued.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.logs.contains("npm ERR! missing script: build"));
    assert!(deployment
        .log_lines()
        .last()
        .unwrap()
        .starts_with("Deployment failed:"));
}

#[tokio::test]
async fn test_interleaved_build_output_is_persisted_in_order() {
    let harness = Harness::new();
    let lines = [
        "stdout: step 1",
        "stderr: warning: deprecated",
        "stdout: step 2",
        "stderr: warning: slow",
        "stdout: step 3",
    ];
    harness.runtime.set_build_lines(&lines);
    let owner = alice();
    let project = harness.project(&owner).await;

    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&queued.id).await;

    let deployment = harness.store.get_deployment(&queued.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Healthy);

    let persisted: Vec<&str> = deployment
        .log_lines()
        .filter(|l| l.starts_with("stdout:") || l.starts_with("stderr:"))
        .collect();
    assert_eq!(persisted, lines);
}

#[tokio::test]
async fn test_redeploy_replaces_previous_container() {
    let harness = Harness::new();
    let owner = alice();
    let project = harness.project(&owner).await;

    let first = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&first.id).await;
    let second = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&second.id).await;
    assert_ne!(first.id, second.id);

    let deployments = harness
        .orchestrator
        .list_deployments(&owner, &project.id)
        .await
        .unwrap();
    assert_eq!(deployments.len(), 2);
    for deployment in &deployments {
        assert_eq!(deployment.status, DeploymentStatus::Healthy);
    }

    let latest = harness.store.get_deployment(&second.id).await.unwrap().unwrap();
    assert!(latest
        .log_lines()
        .any(|l| l == format!("Stopped previous container {}", project.subdomain)));
    let container = harness.runtime.container(&project.subdomain).unwrap();
    assert_eq!(Some(container.image), latest.image_tag);
}

#[tokio::test]
async fn test_overlapping_triggers_replace_containers_without_errors() {
    let harness = Harness::new();
    harness.runtime.hold_runs.store(true, Ordering::SeqCst);
    let owner = alice();
    let project = harness.project(&owner).await;

    let first = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    let second = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();

    // Both pipelines cleared the name before either container started
    harness.runtime.wait_for_calls("run_container", 2).await;
    assert_eq!(harness.runtime.call_count("stop_container"), 2);
    assert_eq!(harness.runtime.call_count("remove_container"), 2);
    assert!(harness.runtime.container(&project.subdomain).is_none());

    harness.runtime.release_runs();
    harness.orchestrator.join(&first.id).await;
    harness.orchestrator.join(&second.id).await;

    let mut statuses = Vec::new();
    for id in [&first.id, &second.id] {
        let deployment = harness.store.get_deployment(id).await.unwrap().unwrap();
        assert!(!deployment.logs.contains("stop"), "{}", deployment.logs);
        statuses.push((deployment.status, deployment.logs));
    }

    // The runtime keeps one container per name; the later start loses
    let healthy = statuses
        .iter()
        .filter(|(status, _)| *status == DeploymentStatus::Healthy)
        .count();
    assert_eq!(healthy, 1);
    let (_, failed_logs) = statuses
        .iter()
        .find(|(status, _)| *status == DeploymentStatus::Failed)
        .unwrap();
    assert!(failed_logs.contains("is already in use"));

    let containers = harness.runtime.containers.lock().unwrap();
    assert_eq!(containers.len(), 1);
    assert!(containers[&project.subdomain].running);
}

#[tokio::test]
async fn test_failed_first_status_write_is_logged() {
    let store = Arc::new(StatusFaultStore {
        inner: MemoryStore::new(),
        failing: DeploymentStatus::Building,
    });
    let runtime = Arc::new(FakeRuntime::new());
    let build_root = tempfile::tempdir().unwrap();
    let broadcaster = Arc::new(LogBroadcaster::new(store.clone()));
    let ctx = PipelineContext {
        store: store.clone(),
        runtime: runtime.clone(),
        codec: Arc::new(AesGcmCodec::new(&SecretString::from(SECRET_KEY)).unwrap()),
        broadcaster: broadcaster.clone(),
        events: Arc::new(NoopEventSink),
        build_root: Dir::new(build_root.path()),
        domain: DOMAIN.to_string(),
        limits: ResourceLimits::default(),
    };

    let project = Project::new("alice", new_project("My Blog")).unwrap();
    store.insert_project(&project).await.unwrap();
    let deployment = Deployment::queued(project.id.clone());
    store.insert_deployment(&deployment).await.unwrap();
    broadcaster.open(&deployment.id);

    run_pipeline(ctx, project, deployment.id.clone()).await;

    let row = store.get_deployment(&deployment.id).await.unwrap().unwrap();
    assert_eq!(row.status, DeploymentStatus::Queued);
    assert!(row
        .log_lines()
        .last()
        .unwrap()
        .starts_with("Deployment failed: Storage error: disk full"));
    assert!(runtime.calls().is_empty());
    assert!(!broadcaster.is_open(&deployment.id));
}

#[tokio::test]
async fn test_panicking_step_resolves_to_failed() {
    let harness = Harness::new();
    harness.runtime.panic_on_run.store(true, Ordering::SeqCst);
    let owner = alice();
    let project = harness.project(&owner).await;

    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&queued.id).await;

    let deployment = harness.store.get_deployment(&queued.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Failed);
    assert!(deployment.logs.contains("runtime exploded"));
    assert_eq!(harness.leftover_builds(), 0);
    assert!(!harness.broadcaster.is_open(&queued.id));
}

#[tokio::test]
async fn test_live_subscriber_sees_lines_until_terminal_status() {
    let harness = Harness::with_runtime(FakeRuntime::gated());
    harness.runtime.set_build_lines(&["building layer 1", "building layer 2"]);
    let owner = alice();
    let project = harness.project(&owner).await;

    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    let mut rx = harness
        .orchestrator
        .subscribe(&owner, &queued.id)
        .await
        .unwrap()
        .expect("topic is open while the pipeline runs");
    harness.runtime.release();

    let mut received = Vec::new();
    loop {
        match rx.recv().await {
            Ok(line) => received.push(line),
            Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(_)) => panic!("subscriber lagged"),
        }
    }

    // The topic closes only after the terminal status is written
    let deployment = harness.store.get_deployment(&queued.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Healthy);

    assert!(received.contains(&"building layer 1".to_string()));
    assert!(received.contains(&"building layer 2".to_string()));
    let persisted: Vec<String> = deployment.log_lines().map(str::to_string).collect();
    assert!(persisted.ends_with(&received));

    harness.orchestrator.join(&queued.id).await;
    assert!(harness
        .orchestrator
        .subscribe(&owner, &queued.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_stop_marks_latest_healthy_deployment_stopped() {
    let harness = Harness::new();
    let owner = alice();
    let project = harness.project(&owner).await;

    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&queued.id).await;

    assert!(harness.orchestrator.stop(&owner, &project.id).await.unwrap());
    let deployment = harness.store.get_deployment(&queued.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Stopped);

    // Nothing left running: stopping again changes nothing
    assert!(!harness.orchestrator.stop(&owner, &project.id).await.unwrap());
    let deployment = harness.store.get_deployment(&queued.id).await.unwrap().unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Stopped);

    harness.orchestrator.restart(&owner, &project.id).await.unwrap();
    assert!(harness.runtime.container(&project.subdomain).unwrap().running);
}

#[tokio::test]
async fn test_stop_leaves_failed_latest_deployment_alone() {
    let harness = Harness::new();
    let owner = alice();
    let project = harness.project(&owner).await;

    let healthy = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&healthy.id).await;

    *harness.runtime.build_error.lock().unwrap() = Some("exit status 1".to_string());
    let failed = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&failed.id).await;

    // The earlier container keeps serving and can still be stopped
    assert!(harness.orchestrator.stop(&owner, &project.id).await.unwrap());
    let latest = harness.store.get_deployment(&failed.id).await.unwrap().unwrap();
    assert_eq!(latest.status, DeploymentStatus::Failed);
    let earlier = harness.store.get_deployment(&healthy.id).await.unwrap().unwrap();
    assert_eq!(earlier.status, DeploymentStatus::Healthy);
}

#[tokio::test]
async fn test_stop_without_container_is_a_no_op() {
    let harness = Harness::new();
    let owner = alice();
    let project = harness.project(&owner).await;

    assert!(!harness.orchestrator.stop(&owner, &project.id).await.unwrap());
    assert!(harness
        .orchestrator
        .list_deployments(&owner, &project.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_read_paths_degrade_for_absent_container() {
    let harness = Harness::new();
    let owner = alice();
    let project = harness.project(&owner).await;

    let stats = harness
        .orchestrator
        .metrics(&owner, project.id.as_str())
        .await
        .unwrap();
    assert_eq!(stats, ContainerStats::default());

    let logs = harness
        .orchestrator
        .logs(&owner, &project.subdomain, 50)
        .await
        .unwrap();
    assert!(logs.is_empty());
}

#[tokio::test]
async fn test_metrics_resolve_by_subdomain() {
    let harness = Harness::new();
    let owner = alice();
    let project = harness.project(&owner).await;
    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&queued.id).await;

    let stats = harness
        .orchestrator
        .metrics(&owner, &project.subdomain)
        .await
        .unwrap();
    assert!(stats.cpu > 0.0);
    assert!(stats.memory > 0);
}

#[tokio::test]
async fn test_other_users_cannot_deploy() {
    let harness = Harness::new();
    let project = harness.project(&alice()).await;

    let result = harness.orchestrator.trigger(&bob(), &project.id).await;
    assert!(matches!(result, Err(PlatformError::Forbidden(_))));
    assert!(harness
        .store
        .list_deployments(&project.id)
        .await
        .unwrap()
        .is_empty());
    assert!(harness.runtime.calls().is_empty());
}

#[tokio::test]
async fn test_delete_project_tears_down_container() {
    let harness = Harness::new();
    let owner = alice();
    let project = harness.project(&owner).await;
    let queued = harness.orchestrator.trigger(&owner, &project.id).await.unwrap();
    harness.orchestrator.join(&queued.id).await;

    harness
        .orchestrator
        .delete_project(&owner, &project.id)
        .await
        .unwrap();

    assert!(harness.runtime.container(&project.subdomain).is_none());
    assert!(harness.store.get_project(&project.id).await.unwrap().is_none());
    // Deployment history survives the project
    assert!(harness.store.get_deployment(&queued.id).await.unwrap().is_some());
    assert_eq!(
        harness.events.kinds().last(),
        Some(&EventKind::ProjectDeleted)
    );
}
