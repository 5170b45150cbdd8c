//! Domain models

pub mod container;
pub mod deployment;
pub mod env_var;
pub mod ids;
pub mod project;
