//! Finite state machine for the deployment lifecycle

use crate::errors::OrchestratorError;
use crate::models::deployment::DeploymentStatus;

/// Lifecycle command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentCommand {
    /// Every approval record approved
    GateApproved,

    /// Some approval record rejected
    GateRejected,

    /// Defer the start to a point in time
    Schedule,

    /// Begin execution; `force` re-runs a successful deployment
    Start { force: bool },

    /// Execution finished
    Complete { success: bool },

    /// Operator stop
    Stop,

    /// A rollback of this deployment succeeded
    MarkRolledBack,
}

/// Deployment FSM
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    status: DeploymentStatus,
}

impl DeploymentFsm {
    pub fn new(status: DeploymentStatus) -> Self {
        Self { status }
    }

    /// Status a new deployment enters
    pub fn initial(requires_approval: bool) -> DeploymentStatus {
        if requires_approval {
            DeploymentStatus::PendingApproval
        } else {
            DeploymentStatus::Approved
        }
    }

    /// Get current status
    pub fn status(&self) -> DeploymentStatus {
        self.status
    }

    /// Process a command and transition state
    pub fn process(
        &mut self,
        command: DeploymentCommand,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        self.status = Self::transition(self.status, command)?;
        Ok(self.status)
    }

    /// The status `command` leads to from `status`, if legal
    pub fn transition(
        status: DeploymentStatus,
        command: DeploymentCommand,
    ) -> Result<DeploymentStatus, OrchestratorError> {
        use DeploymentCommand as C;
        use DeploymentStatus as S;

        let next = match (status, command) {
            // From PendingApproval
            (S::PendingApproval, C::GateApproved) => S::Approved,
            (S::PendingApproval, C::GateRejected) => S::Rejected,

            // From Approved / Scheduled
            (S::Approved | S::Scheduled, C::Schedule) => S::Scheduled,
            (S::Approved | S::Scheduled, C::Start { .. }) => S::Deploying,
            (S::Scheduled, C::Stop) => S::Failed,

            // Re-run of a finished deployment
            (S::Success, C::Start { force: true }) => S::Deploying,

            // From Deploying
            (S::Deploying, C::Start { .. }) => {
                return Err(OrchestratorError::illegal(status, "already deploying"));
            }
            (S::Deploying, C::Complete { success: true }) => S::Success,
            (S::Deploying, C::Complete { success: false }) => S::Failed,
            (S::Deploying, C::Stop) => S::Failed,

            // Rollback bookkeeping
            (S::Success | S::Failed, C::MarkRolledBack) => S::RolledBack,

            (_, C::Start { .. }) => {
                return Err(OrchestratorError::illegal(status, "not deployable"));
            }
            (status, command) => {
                return Err(OrchestratorError::illegal(
                    status,
                    format!("invalid transition: {} -> {:?}", status, command),
                ));
            }
        };

        Ok(next)
    }

    /// Whether a rollback may be requested against `status`
    pub fn can_roll_back(status: DeploymentStatus) -> bool {
        matches!(status, DeploymentStatus::Success | DeploymentStatus::Failed)
    }
}
