//! Host metrics collection

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::warn;

/// Snapshot of the machine the platform runs on
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostMetrics {
    /// CPU usage percentage (0-100)
    pub cpu_usage: f32,

    /// Memory usage in bytes
    pub memory_used: u64,

    /// Total memory in bytes
    pub memory_total: u64,

    /// System uptime in seconds
    pub uptime_secs: u64,

    pub hostname: String,
}

/// Collect host metrics. Blocks while sysinfo samples the CPU.
pub fn collect_host_metrics() -> HostMetrics {
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    HostMetrics {
        cpu_usage: sys.global_cpu_usage(),
        memory_used: sys.used_memory(),
        memory_total: sys.total_memory(),
        uptime_secs: System::uptime(),
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
    }
}

/// [`collect_host_metrics`] off the async executor
pub async fn host_metrics() -> HostMetrics {
    match tokio::task::spawn_blocking(collect_host_metrics).await {
        Ok(metrics) => metrics,
        Err(e) => {
            warn!("Host metrics collection failed: {}", e);
            HostMetrics::default()
        }
    }
}
