//! `--diagnostic` report

use serde::Serialize;

use crate::app::options::AppOptions;
use crate::deploy::docker::DockerCli;
use crate::deploy::runtime::ContainerRuntime;
use crate::utils::{version_info, VersionInfo};

#[derive(Debug, Serialize)]
pub struct DiagnosticReport {
    pub version: VersionInfo,
    pub base_dir: String,
    pub runtime_reachable: bool,
    pub managed_containers: Option<usize>,
    pub network: String,
    pub domain: String,
}

/// Probe the environment the service would run in
pub async fn collect_diagnostic(options: &AppOptions) -> DiagnosticReport {
    let runtime = DockerCli::new(options.docker.clone());
    let runtime_reachable = runtime.health_check().await;
    let managed_containers = if runtime_reachable {
        runtime.list_containers().await.ok().map(|c| c.len())
    } else {
        None
    };

    DiagnosticReport {
        version: version_info(),
        base_dir: options.layout.base_dir.display().to_string(),
        runtime_reachable,
        managed_containers,
        network: options.docker.network.clone(),
        domain: options.domain.clone(),
    }
}
