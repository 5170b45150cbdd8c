//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::authn::principal::{JwtPrincipalResolver, PrincipalResolver};
use crate::deploy::broadcaster::LogBroadcaster;
use crate::deploy::docker::DockerCli;
use crate::deploy::orchestrator::Orchestrator;
use crate::deploy::pipeline::PipelineContext;
use crate::deploy::runtime::ContainerRuntime;
use crate::errors::PlatformError;
use crate::secrets::AesGcmCodec;
use crate::storage::settings::ResolvedSecrets;
use crate::store::{JsonFileStore, MemoryStore, PlatformStore};
use crate::telemetry::{EventSink, HttpEventSink, NoopEventSink};

/// Main application state
pub struct AppState {
    /// Project and deployment persistence
    pub store: Arc<dyn PlatformStore>,

    /// Container engine adapter
    pub runtime: Arc<dyn ContainerRuntime>,

    /// Deployment orchestrator
    pub orchestrator: Arc<Orchestrator>,

    /// Bearer token resolver
    pub resolver: Arc<dyn PrincipalResolver>,
}

impl AppState {
    /// Initialize application state
    pub async fn init(options: &AppOptions, secrets: ResolvedSecrets) -> Result<Self, PlatformError> {
        info!("Initializing application state...");

        options.layout.setup().await?;

        let store: Arc<dyn PlatformStore> = if options.persist_store {
            let file = options.layout.store_file();
            info!("Using store snapshot at {}", file.path().display());
            Arc::new(JsonFileStore::open(file).await?)
        } else {
            info!("Using in-memory store");
            Arc::new(MemoryStore::new())
        };

        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerCli::new(options.docker.clone()));
        if !runtime.health_check().await {
            tracing::warn!("Container runtime is not reachable; deployments will fail until it is");
        }

        let events: Arc<dyn EventSink> = match &options.events_endpoint {
            Some(endpoint) => Arc::new(HttpEventSink::new(endpoint.clone())),
            None => Arc::new(NoopEventSink),
        };

        let ctx = PipelineContext {
            store: store.clone(),
            runtime: runtime.clone(),
            codec: Arc::new(AesGcmCodec::new(&secrets.secret_key)?),
            broadcaster: Arc::new(LogBroadcaster::new(store.clone())),
            events,
            build_root: options.layout.builds_dir(),
            domain: options.domain.clone(),
            limits: options.limits,
        };

        Ok(Self {
            store,
            runtime,
            orchestrator: Arc::new(Orchestrator::new(ctx)),
            resolver: Arc::new(JwtPrincipalResolver::new(&secrets.jwt_secret)),
        })
    }

    /// Abort running pipelines and persist whatever is buffered
    pub async fn shutdown(&self) -> Result<(), PlatformError> {
        info!("Shutting down application state...");
        self.orchestrator.shutdown();
        self.store.flush().await
    }
}
