//! Server state

use std::sync::Arc;

use crate::deploy::controller::DeploymentController;
use crate::deploy::rollback::RollbackCoordinator;

/// Server state shared across handlers
pub struct ServerState {
    pub controller: Arc<DeploymentController>,
    pub rollbacks: Arc<RollbackCoordinator>,
}

impl ServerState {
    pub fn new(
        controller: Arc<DeploymentController>,
        rollbacks: Arc<RollbackCoordinator>,
    ) -> Self {
        Self {
            controller,
            rollbacks,
        }
    }
}
