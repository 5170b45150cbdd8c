//! Dockyard Library
//!
//! Deployment orchestration core: turns a registered repository into a
//! running, routed container and reports progress while doing so.

pub mod app;
pub mod authn;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod secrets;
pub mod server;
pub mod storage;
pub mod store;
pub mod telemetry;
pub mod utils;
