//! Rollback coordinator

use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::authz::caller::{Caller, Permission};
use crate::deploy::controller::DeploymentController;
use crate::deploy::executor::{ExecutionCoordinator, ExecutionOutcome};
use crate::deploy::fsm::DeploymentFsm;
use crate::deploy::journal;
use crate::deploy::queue::ExecutionJob;
use crate::errors::OrchestratorError;
use crate::models::deployment::{Deployment, DeploymentFilter, DeploymentStatus};
use crate::utils::generate_uuid;

/// When the rollback deployment runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackMode {
    /// Run now, before returning
    Immediate,
    /// Leave it to the scheduler
    Scheduled,
}

impl FromStr for RollbackMode {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "immediate" => Ok(RollbackMode::Immediate),
            "scheduled" => Ok(RollbackMode::Scheduled),
            _ => Err(OrchestratorError::ValidationError(format!(
                "Invalid rollback mode: {}",
                s
            ))),
        }
    }
}

/// Input of [`RollbackCoordinator::rollback_to`]
#[derive(Debug, Clone)]
pub struct RollbackRequest {
    pub target_version: String,
    pub reason: String,
    pub mode: RollbackMode,
    /// Required for [`RollbackMode::Scheduled`]
    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct RollbackResult {
    pub rollback: Deployment,
    pub original: Deployment,
}

pub struct RollbackCoordinator {
    controller: Arc<DeploymentController>,
    executor: Arc<ExecutionCoordinator>,
    // guard check and creation must not interleave
    create_lock: Mutex<()>,
}

impl RollbackCoordinator {
    pub fn new(controller: Arc<DeploymentController>, executor: Arc<ExecutionCoordinator>) -> Self {
        Self {
            controller,
            executor,
            create_lock: Mutex::new(()),
        }
    }

    /// Re-deploy `target_version` in place of deployment `deployment_id`
    pub async fn rollback_to(
        &self,
        caller: &Caller,
        deployment_id: &str,
        request: RollbackRequest,
    ) -> Result<RollbackResult, OrchestratorError> {
        caller.require(Permission::Rollback)?;

        let target_version = request.target_version.trim().to_string();
        if target_version.is_empty() {
            return Err(OrchestratorError::ValidationError(
                "target version is required".to_string(),
            ));
        }
        let scheduled_at = match (request.mode, request.scheduled_at) {
            (RollbackMode::Scheduled, None) => {
                return Err(OrchestratorError::ValidationError(
                    "scheduled rollback needs a time".to_string(),
                ));
            }
            (RollbackMode::Scheduled, at) => at,
            (RollbackMode::Immediate, _) => None,
        };

        let stores = self.controller.stores();
        let rollback = {
            let _guard = self.create_lock.lock().await;

            let source = stores.deployments.require(deployment_id).await?;
            if !DeploymentFsm::can_roll_back(source.status) {
                return Err(OrchestratorError::illegal(
                    source.status,
                    "only finished deployments can be rolled back",
                ));
            }

            let in_flight = stores
                .deployments
                .count(&DeploymentFilter {
                    project_id: Some(source.project_id.clone()),
                    environment: Some(source.environment),
                    statuses: Some(vec![DeploymentStatus::Deploying, DeploymentStatus::Scheduled]),
                    rollbacks_only: true,
                    ..DeploymentFilter::default()
                })
                .await?;
            if in_flight > 0 {
                return Err(OrchestratorError::illegal(
                    source.status,
                    format!(
                        "a rollback is already in progress for this project in {}",
                        source.environment
                    ),
                ));
            }

            let build_number = stores
                .deployments
                .count(&DeploymentFilter {
                    project_id: Some(source.project_id.clone()),
                    ..DeploymentFilter::default()
                })
                .await? as u64
                + 1;

            let now = Utc::now();
            let (status, started_at) = match request.mode {
                RollbackMode::Immediate => (DeploymentStatus::Deploying, Some(now)),
                RollbackMode::Scheduled => (DeploymentStatus::Scheduled, None),
            };
            let mut log = journal::line(&format!(
                "rollback of deployment {} ({}) to version {} requested by {}",
                source.id,
                source.version.as_deref().unwrap_or("unknown"),
                target_version,
                caller.name
            ));
            if !request.reason.trim().is_empty() {
                log.push_str(&journal::line(&format!("reason: {}", request.reason.trim())));
            }

            stores
                .deployments
                .create(Deployment {
                    id: generate_uuid(),
                    project_id: source.project_id.clone(),
                    name: format!("{} rollback to {}", source.name, target_version),
                    description: Some(request.reason.clone()),
                    environment: source.environment,
                    version: Some(target_version.clone()),
                    build_number: Some(build_number),
                    status,
                    scheduled_at,
                    started_at,
                    completed_at: None,
                    duration: None,
                    log,
                    result: None,
                    owner_id: caller.id.clone(),
                    host_id: source.host_id.clone(),
                    rollback_of: Some(source.id.clone()),
                    created_at: now,
                    updated_at: now,
                })
                .await?
        };

        info!(
            deployment_id,
            rollback_id = %rollback.id,
            target_version = %target_version,
            mode = ?request.mode,
            "Rollback created"
        );

        let rollback = match request.mode {
            RollbackMode::Scheduled => rollback,
            RollbackMode::Immediate => {
                let job = ExecutionJob {
                    deployment_id: rollback.id.clone(),
                    deploy_only: true,
                };
                let outcome = match self.executor.execute(&job).await {
                    Some(outcome) => outcome,
                    None => {
                        warn!(rollback_id = %rollback.id, "Rollback run was skipped");
                        ExecutionOutcome::failed(
                            &rollback.id,
                            &OrchestratorError::Internal("rollback run was skipped".to_string()),
                        )
                    }
                };
                self.controller.report_outcome(&outcome).await?
            }
        };

        let original = stores.deployments.require(deployment_id).await?;
        Ok(RollbackResult { rollback, original })
    }
}
