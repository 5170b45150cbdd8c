//! Application configuration options

use std::time::Duration;

use crate::deploy::docker::DockerOptions;
use crate::deploy::runtime::ResourceLimits;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub layout: StorageLayout,

    /// Keep the store in a JSON snapshot on disk
    pub persist_store: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Docker adapter configuration
    pub docker: DockerOptions,

    /// Apex domain for project routing
    pub domain: String,

    /// Per-container resource limits
    pub limits: ResourceLimits,

    /// Platform event collector
    pub events_endpoint: Option<String>,
}

impl AppOptions {
    pub fn from_settings(layout: StorageLayout, settings: &Settings) -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            layout,
            persist_store: settings.persist_store,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            docker: DockerOptions {
                docker_binary: settings.runtime.docker_binary.clone(),
                git_binary: settings.runtime.git_binary.clone(),
                network: settings.runtime.network.clone(),
                ..Default::default()
            },
            domain: settings.runtime.domain.clone(),
            limits: ResourceLimits {
                cpus: settings.runtime.cpus,
                memory_mb: settings.runtime.memory_mb,
            },
            events_endpoint: settings.events_endpoint.clone(),
        }
    }
}

impl Default for AppOptions {
    fn default() -> Self {
        Self::from_settings(StorageLayout::default(), &Settings::default())
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}
