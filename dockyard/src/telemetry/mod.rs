//! Host metrics and outbound platform events

pub mod events;
pub mod host;

pub use events::{EventKind, EventSink, HttpEventSink, NoopEventSink, PlatformEvent};
pub use host::{collect_host_metrics, host_metrics, HostMetrics};
