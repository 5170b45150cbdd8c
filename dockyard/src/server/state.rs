//! Server state

use std::sync::Arc;

use crate::authn::principal::PrincipalResolver;
use crate::deploy::orchestrator::Orchestrator;

/// Server state shared across handlers
pub struct ServerState {
    pub orchestrator: Arc<Orchestrator>,
    pub resolver: Arc<dyn PrincipalResolver>,
}

impl ServerState {
    pub fn new(orchestrator: Arc<Orchestrator>, resolver: Arc<dyn PrincipalResolver>) -> Self {
        Self {
            orchestrator,
            resolver,
        }
    }
}
