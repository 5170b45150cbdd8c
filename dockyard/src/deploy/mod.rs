//! Deployment module

pub mod broadcaster;
pub mod docker;
pub mod fsm;
pub mod git;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;
