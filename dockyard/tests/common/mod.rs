//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::SecretString;
use tempfile::TempDir;
use tokio::sync::Semaphore;

use dockyard::authn::principal::{AccessTokenClaims, JwtPrincipalResolver, Principal, Role};
use dockyard::deploy::broadcaster::LogBroadcaster;
use dockyard::deploy::orchestrator::Orchestrator;
use dockyard::deploy::pipeline::PipelineContext;
use dockyard::deploy::runtime::{ContainerRuntime, LogLineFn, ResourceLimits, RunSpec};
use dockyard::deploy::fsm::DeploymentStatus;
use dockyard::errors::{PlatformError, PlatformResult};
use dockyard::filesys::dir::Dir;
use dockyard::models::container::{ContainerInfo, ContainerStats};
use dockyard::models::deployment::Deployment;
use dockyard::models::env_var::EnvVar;
use dockyard::models::ids::{DeploymentId, EnvVarId, ProjectId};
use dockyard::models::project::{NewProject, Project};
use dockyard::secrets::AesGcmCodec;
use dockyard::server::state::ServerState;
use dockyard::store::{MemoryStore, PlatformStore};
use dockyard::telemetry::{EventKind, EventSink, PlatformEvent};

pub const DOMAIN: &str = "apps.test";
pub const JWT_SECRET: &str = "test-jwt-secret";
pub const SECRET_KEY: &str = "test-secret-key";

#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub id: String,
    pub image: String,
    pub env: HashMap<String, String>,
    pub running: bool,
}

/// Scriptable in-process container runtime
pub struct FakeRuntime {
    pub reachable: AtomicBool,
    pub clone_error: Mutex<Option<String>>,
    pub build_lines: Mutex<Vec<String>>,
    pub build_error: Mutex<Option<String>>,
    pub panic_on_run: AtomicBool,
    /// When set, `run_container` waits for [`FakeRuntime::release_runs`]
    pub hold_runs: AtomicBool,
    pub containers: Mutex<HashMap<String, FakeContainer>>,
    pub calls: Mutex<Vec<String>>,
    gate: Semaphore,
    run_gate: Semaphore,
    counter: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// Pipelines block at the health check until [`FakeRuntime::release`]
    pub fn gated() -> Self {
        Self::with_permits(0)
    }

    fn with_permits(permits: usize) -> Self {
        Self {
            reachable: AtomicBool::new(true),
            clone_error: Mutex::new(None),
            build_lines: Mutex::new(vec![
                "#1 [internal] load build definition from Dockerfile".to_string(),
                "#2 DONE 0.1s".to_string(),
            ]),
            build_error: Mutex::new(None),
            panic_on_run: AtomicBool::new(false),
            hold_runs: AtomicBool::new(false),
            containers: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            gate: Semaphore::new(permits),
            run_gate: Semaphore::new(0),
            counter: AtomicUsize::new(0),
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn release_runs(&self) {
        self.run_gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| *c == name).count()
    }

    /// Poll until `name` has been called `count` times
    pub async fn wait_for_calls(&self, name: &str, count: usize) {
        for _ in 0..500 {
            if self.call_count(name) >= count {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("{} was not called {} times: {:?}", name, count, self.calls());
    }

    pub fn set_build_lines(&self, lines: &[&str]) {
        *self.build_lines.lock().unwrap() = lines.iter().map(|l| l.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls().iter().any(|c| c == name)
    }

    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        self.containers.lock().unwrap().get(name).cloned()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn next_id(&self) -> usize {
        self.counter.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn health_check(&self) -> bool {
        let _permit = self.gate.acquire().await;
        self.record("health_check");
        self.reachable.load(Ordering::SeqCst)
    }

    async fn ensure_network(&self) -> PlatformResult<()> {
        self.record("ensure_network");
        Ok(())
    }

    async fn clone_repository(&self, url: &str, _branch: &str, dest: &Path) -> PlatformResult<()> {
        self.record("clone_repository");
        if let Some(message) = self.clone_error.lock().unwrap().clone() {
            return Err(PlatformError::CloneError(format!("{}: {}", url, message)));
        }
        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(dest.join("Dockerfile"), "FROM scratch\n").await?;
        Ok(())
    }

    async fn build_image(
        &self,
        context: &Path,
        name_hint: &str,
        on_line: LogLineFn<'_>,
    ) -> PlatformResult<String> {
        self.record("build_image");
        assert!(context.join("Dockerfile").exists());

        let lines = self.build_lines.lock().unwrap().clone();
        for line in &lines {
            on_line(line);
        }
        if let Some(message) = self.build_error.lock().unwrap().clone() {
            return Err(PlatformError::BuildError(message));
        }
        Ok(format!("fake/{}:{}", name_hint, self.next_id()))
    }

    async fn run_container(&self, spec: &RunSpec) -> PlatformResult<String> {
        self.record("run_container");
        if self.hold_runs.load(Ordering::SeqCst) {
            let _permit = self.run_gate.acquire().await;
        }
        if self.panic_on_run.load(Ordering::SeqCst) {
            panic!("runtime exploded");
        }
        let id = format!("c{:04}aaaabbbbccccdddd", self.next_id());
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&spec.name) {
            return Err(PlatformError::RuntimeError(format!(
                "Conflict. The container name \"/{}\" is already in use",
                spec.name
            )));
        }
        containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                image: spec.image.clone(),
                env: spec.env.clone(),
                running: true,
            },
        );
        Ok(id)
    }

    async fn stop_container(&self, name: &str) -> PlatformResult<bool> {
        self.record("stop_container");
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(name) {
            Some(container) if container.running => {
                container.running = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn remove_container(&self, name: &str) -> PlatformResult<()> {
        self.record("remove_container");
        self.containers.lock().unwrap().remove(name);
        Ok(())
    }

    async fn restart_container(&self, name: &str) -> PlatformResult<()> {
        self.record("restart_container");
        let mut containers = self.containers.lock().unwrap();
        match containers.get_mut(name) {
            Some(container) => {
                container.running = true;
                Ok(())
            }
            None => Err(PlatformError::NotFound(format!("container {}", name))),
        }
    }

    async fn list_containers(&self) -> PlatformResult<Vec<ContainerInfo>> {
        let containers = self.containers.lock().unwrap();
        Ok(containers
            .iter()
            .map(|(name, c)| ContainerInfo {
                id: c.id.clone(),
                name: name.clone(),
                status: if c.running {
                    "Up 1 second".to_string()
                } else {
                    "Exited (0) 1 second ago".to_string()
                },
                ports: String::new(),
                created_at: "2026-10-15 12:00:00 +0000 UTC".to_string(),
            })
            .collect())
    }

    async fn stats(&self, name: &str) -> PlatformResult<ContainerStats> {
        match self.containers.lock().unwrap().get(name) {
            Some(c) if c.running => Ok(ContainerStats {
                cpu: 2.5,
                memory: 64 * 1024 * 1024,
            }),
            _ => Err(PlatformError::RuntimeError(format!(
                "No such container: {}",
                name
            ))),
        }
    }

    async fn logs(&self, name: &str, lines: usize) -> PlatformResult<String> {
        match self.containers.lock().unwrap().get(name) {
            Some(_) => Ok(format!("listening on port 3000 ({} lines requested)\n", lines)),
            None => Err(PlatformError::RuntimeError(format!(
                "No such container: {}",
                name
            ))),
        }
    }
}

/// [`MemoryStore`] whose status writes to one status always fail
pub struct StatusFaultStore {
    pub inner: MemoryStore,
    pub failing: DeploymentStatus,
}

#[async_trait]
impl PlatformStore for StatusFaultStore {
    async fn insert_project(&self, project: &Project) -> PlatformResult<()> {
        self.inner.insert_project(project).await
    }

    async fn get_project(&self, id: &ProjectId) -> PlatformResult<Option<Project>> {
        self.inner.get_project(id).await
    }

    async fn find_project_by_subdomain(&self, subdomain: &str) -> PlatformResult<Option<Project>> {
        self.inner.find_project_by_subdomain(subdomain).await
    }

    async fn list_projects(&self, owner_id: Option<&str>) -> PlatformResult<Vec<Project>> {
        self.inner.list_projects(owner_id).await
    }

    async fn update_project(&self, project: &Project) -> PlatformResult<()> {
        self.inner.update_project(project).await
    }

    async fn delete_project(&self, id: &ProjectId) -> PlatformResult<Option<Project>> {
        self.inner.delete_project(id).await
    }

    async fn insert_deployment(&self, deployment: &Deployment) -> PlatformResult<()> {
        self.inner.insert_deployment(deployment).await
    }

    async fn get_deployment(&self, id: &DeploymentId) -> PlatformResult<Option<Deployment>> {
        self.inner.get_deployment(id).await
    }

    async fn list_deployments(&self, project_id: &ProjectId) -> PlatformResult<Vec<Deployment>> {
        self.inner.list_deployments(project_id).await
    }

    async fn update_deployment_status(
        &self,
        id: &DeploymentId,
        status: DeploymentStatus,
    ) -> PlatformResult<Deployment> {
        if status == self.failing {
            return Err(PlatformError::StorageError(format!(
                "disk full while writing {}",
                status
            )));
        }
        self.inner.update_deployment_status(id, status).await
    }

    async fn set_image_tag(&self, id: &DeploymentId, image_tag: &str) -> PlatformResult<()> {
        self.inner.set_image_tag(id, image_tag).await
    }

    async fn set_container_id(&self, id: &DeploymentId, container_id: &str) -> PlatformResult<()> {
        self.inner.set_container_id(id, container_id).await
    }

    async fn append_log(&self, id: &DeploymentId, line: &str) -> PlatformResult<()> {
        self.inner.append_log(id, line).await
    }

    async fn insert_env_var(&self, env_var: &EnvVar) -> PlatformResult<()> {
        self.inner.insert_env_var(env_var).await
    }

    async fn list_env_vars(&self, project_id: &ProjectId) -> PlatformResult<Vec<EnvVar>> {
        self.inner.list_env_vars(project_id).await
    }

    async fn delete_env_var(&self, project_id: &ProjectId, id: &EnvVarId) -> PlatformResult<bool> {
        self.inner.delete_env_var(project_id, id).await
    }
}

/// Keeps every emitted event for inspection
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<PlatformEvent>>,
}

impl RecordingSink {
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().unwrap().iter().map(|e| e.kind).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: PlatformEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub runtime: Arc<FakeRuntime>,
    pub events: Arc<RecordingSink>,
    pub broadcaster: Arc<LogBroadcaster>,
    pub orchestrator: Arc<Orchestrator>,
    pub build_root: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_runtime(FakeRuntime::new())
    }

    pub fn with_runtime(runtime: FakeRuntime) -> Self {
        let store = Arc::new(MemoryStore::new());
        let runtime = Arc::new(runtime);
        let events = Arc::new(RecordingSink::default());
        let broadcaster = Arc::new(LogBroadcaster::new(store.clone()));
        let build_root = tempfile::tempdir().unwrap();

        let ctx = PipelineContext {
            store: store.clone(),
            runtime: runtime.clone(),
            codec: Arc::new(AesGcmCodec::new(&SecretString::from(SECRET_KEY)).unwrap()),
            broadcaster: broadcaster.clone(),
            events: events.clone(),
            build_root: Dir::new(build_root.path().join("builds")),
            domain: DOMAIN.to_string(),
            limits: ResourceLimits::default(),
        };

        Self {
            store,
            runtime,
            events,
            broadcaster,
            orchestrator: Arc::new(Orchestrator::new(ctx)),
            build_root,
        }
    }

    pub async fn project(&self, owner: &Principal) -> Project {
        self.orchestrator
            .create_project(owner, new_project("My Blog"))
            .await
            .unwrap()
    }

    pub fn server_state(&self) -> Arc<ServerState> {
        Arc::new(ServerState::new(
            self.orchestrator.clone(),
            Arc::new(JwtPrincipalResolver::new(&SecretString::from(JWT_SECRET))),
        ))
    }

    /// Checkout directories left behind under the build root
    pub fn leftover_builds(&self) -> usize {
        std::fs::read_dir(self.build_root.path().join("builds"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn new_project(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        repository_url: "https://git.example.com/acme/blog.git".to_string(),
        branch: None,
        port: Some(3000),
    }
}

pub fn alice() -> Principal {
    Principal::new("alice", Role::User)
}

pub fn bob() -> Principal {
    Principal::new("bob", Role::User)
}

pub fn admin() -> Principal {
    Principal::new("root", Role::Admin)
}

/// Signed access token for `principal`
pub fn token(principal: &Principal) -> String {
    let claims = AccessTokenClaims {
        sub: principal.user_id.clone(),
        role: principal.role,
        exp: chrono::Utc::now().timestamp() + 3600,
        iss: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}
