//! Deployment lifecycle controller.
//!
//! Every command reads the current record, asks the FSM whether the command
//! is legal, and writes the new state with a status precondition. Two
//! commands racing on one deployment cannot both win: the loser's update is
//! refused by the repository and surfaces as `IllegalTransition`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::authz::caller::{Caller, Permission};
use crate::authz::directory::ApproverDirectory;
use crate::deploy::approval::{ApprovalGate, GateState};
use crate::deploy::executor::ExecutionOutcome;
use crate::deploy::fsm::{DeploymentCommand, DeploymentFsm};
use crate::deploy::journal;
use crate::deploy::queue::{ExecutionJob, JobQueue};
use crate::deploy::runs::RunRegistry;
use crate::deploy::stage::StageExtractor;
use crate::errors::OrchestratorError;
use crate::models::approval::{Approval, Decision};
use crate::models::deployment::{
    Deployment, DeploymentFilter, DeploymentPatch, DeploymentStatus, Environment,
};
use crate::notify::{ApprovalRequested, NotificationSink};
use crate::storage::repository::Stores;
use crate::utils::generate_uuid;

/// Decides whether a new deployment goes through the approval gate
#[derive(Debug, Clone)]
pub struct ApprovalPolicy {
    pub required_environments: Vec<Environment>,
}

impl ApprovalPolicy {
    pub fn requires_approval(&self, environment: Environment, requested: Option<bool>) -> bool {
        environment == Environment::Prod
            || requested == Some(true)
            || self.required_environments.contains(&environment)
    }
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            required_environments: vec![Environment::Prod],
        }
    }
}

/// Input of [`DeploymentController::create`]
#[derive(Debug, Clone, Default)]
pub struct CreateDeployment {
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    /// Defaults to the project's environment
    pub environment: Option<Environment>,
    pub version: Option<String>,
    pub host_id: Option<String>,
    pub require_approval: Option<bool>,
    /// Level-1 approvers; the admin pool when empty
    pub approvers: Vec<String>,
    /// Level-2 approvers
    pub escalation_approvers: Vec<String>,
}

/// Snapshot returned by status polling
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatusView {
    pub status: DeploymentStatus,
    pub current_stage: String,
    pub log: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
}

/// Fixed stage label for statuses without a running execution
pub fn stage_label(status: DeploymentStatus) -> &'static str {
    match status {
        DeploymentStatus::PendingApproval => "awaiting approval",
        DeploymentStatus::Approved => "ready",
        DeploymentStatus::Scheduled => "scheduled",
        DeploymentStatus::Rejected => "rejected",
        DeploymentStatus::Deploying => "in progress",
        DeploymentStatus::Success => "completed",
        DeploymentStatus::Failed => "failed",
        DeploymentStatus::RolledBack => "rolled back",
    }
}

pub struct DeploymentController {
    stores: Stores,
    gate: ApprovalGate,
    directory: Arc<dyn ApproverDirectory>,
    notifier: Arc<dyn NotificationSink>,
    jobs: JobQueue,
    runs: Arc<RunRegistry>,
    policy: ApprovalPolicy,
    stages: StageExtractor,
}

impl DeploymentController {
    pub fn new(
        stores: Stores,
        directory: Arc<dyn ApproverDirectory>,
        notifier: Arc<dyn NotificationSink>,
        jobs: JobQueue,
        runs: Arc<RunRegistry>,
        policy: ApprovalPolicy,
    ) -> Self {
        Self {
            gate: ApprovalGate::new(stores.approvals.clone()),
            stores,
            directory,
            notifier,
            jobs,
            runs,
            policy,
            stages: StageExtractor::default(),
        }
    }

    pub fn with_stage_extractor(mut self, stages: StageExtractor) -> Self {
        self.stages = stages;
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn gate(&self) -> &ApprovalGate {
        &self.gate
    }

    // ================================ COMMANDS =================================== //

    /// Submit a new deployment
    pub async fn create(
        &self,
        caller: &Caller,
        request: CreateDeployment,
    ) -> Result<Deployment, OrchestratorError> {
        caller.require(Permission::Create)?;

        let name = request.name.trim();
        if name.is_empty() {
            return Err(OrchestratorError::ValidationError(
                "deployment name is required".to_string(),
            ));
        }
        if request.project_id.trim().is_empty() {
            return Err(OrchestratorError::ValidationError(
                "project id is required".to_string(),
            ));
        }
        if request
            .approvers
            .iter()
            .chain(request.escalation_approvers.iter())
            .any(|id| id.trim().is_empty())
        {
            return Err(OrchestratorError::ValidationError(
                "approver id must not be empty".to_string(),
            ));
        }

        let project = self.stores.projects.require(&request.project_id).await?;
        if let Some(host_id) = &request.host_id {
            self.stores.hosts.require(host_id).await?.validate()?;
        }

        let environment = request.environment.unwrap_or(project.default_environment);
        let build_number = self
            .stores
            .deployments
            .count(&DeploymentFilter {
                project_id: Some(project.id.clone()),
                ..DeploymentFilter::default()
            })
            .await? as u64
            + 1;

        let requires_approval = self
            .policy
            .requires_approval(environment, request.require_approval);
        let level_one = if !requires_approval {
            Vec::new()
        } else if !request.approvers.is_empty() {
            request.approvers.clone()
        } else {
            self.directory
                .admins()
                .await?
                .into_iter()
                .map(|a| a.id)
                .collect()
        };
        let escalation = if requires_approval {
            request.escalation_approvers.clone()
        } else {
            Vec::new()
        };
        let gated = !level_one.is_empty() || !escalation.is_empty();
        if requires_approval && !gated {
            warn!(
                project_id = %project.id,
                %environment,
                "Approval required but no approver resolved, approving directly"
            );
        }

        let status = DeploymentFsm::initial(gated);
        let now = Utc::now();
        let mut log = journal::line(&format!(
            "deployment #{} created by {} for {}",
            build_number, caller.name, environment
        ));
        if gated {
            log.push_str(&journal::line("awaiting approval"));
        }

        let deployment = self
            .stores
            .deployments
            .create(Deployment {
                id: generate_uuid(),
                project_id: project.id.clone(),
                name: name.to_string(),
                description: request.description,
                environment,
                version: request.version,
                build_number: Some(build_number),
                status,
                scheduled_at: None,
                started_at: None,
                completed_at: None,
                duration: None,
                log,
                result: None,
                owner_id: caller.id.clone(),
                host_id: request.host_id,
                rollback_of: None,
                created_at: now,
                updated_at: now,
            })
            .await?;

        let mut requested = self
            .gate
            .add_approvers(&deployment.id, 1, &level_one)
            .await?;
        requested.extend(
            self.gate
                .add_approvers(&deployment.id, 2, &escalation)
                .await?,
        );
        self.notify_approvers(caller, &deployment, &requested);

        info!(
            deployment_id = %deployment.id,
            project_id = %deployment.project_id,
            status = %deployment.status,
            approvals = requested.len(),
            "Deployment created"
        );
        Ok(deployment)
    }

    /// Add approvers to a deployment still awaiting approval
    pub async fn add_approvers(
        &self,
        caller: &Caller,
        deployment_id: &str,
        level: u32,
        approver_ids: &[String],
    ) -> Result<Vec<Approval>, OrchestratorError> {
        let deployment = self.stores.deployments.require(deployment_id).await?;
        caller.require_owner(&deployment.owner_id)?;
        if deployment.status != DeploymentStatus::PendingApproval {
            return Err(OrchestratorError::illegal(
                deployment.status,
                "approvers can only be added while awaiting approval",
            ));
        }

        let created = self
            .gate
            .add_approvers(deployment_id, level, approver_ids)
            .await?;
        self.notify_approvers(caller, &deployment, &created);
        Ok(created)
    }

    /// Record the caller's decision on their lowest pending approval
    pub async fn decide(
        &self,
        caller: &Caller,
        deployment_id: &str,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<Deployment, OrchestratorError> {
        caller.require(Permission::Approve)?;

        let deployment = self.stores.deployments.require(deployment_id).await?;
        if deployment.status != DeploymentStatus::PendingApproval {
            return Err(OrchestratorError::illegal(
                deployment.status,
                "deployment is not awaiting approval",
            ));
        }

        let approval = self
            .gate
            .decide_next(deployment_id, &caller.id, decision, comment.clone())
            .await
            .map_err(|e| match e {
                OrchestratorError::NotFound(_) => OrchestratorError::AuthorizationError(format!(
                    "{} has no pending approval on deployment {}",
                    caller.id, deployment_id
                )),
                other => other,
            })?;

        let mut note = format!(
            "{} by {} (level {})",
            approval.status.as_str(),
            caller.name,
            approval.level
        );
        if let Some(comment) = comment.filter(|c| !c.trim().is_empty()) {
            note.push_str(&format!(": {}", comment.trim()));
        }

        let (command, completed_at) = match self.gate.evaluate(deployment_id).await? {
            GateState::Rejected => (Some(DeploymentCommand::GateRejected), Some(Utc::now())),
            GateState::Satisfied => (Some(DeploymentCommand::GateApproved), None),
            GateState::Pending => (None, None),
        };

        let mut patch = DeploymentPatch::new()
            .expect_status(&[DeploymentStatus::PendingApproval])
            .append_log(journal::line(&note));
        let target = match command {
            Some(command) => {
                let next = DeploymentFsm::transition(deployment.status, command)?;
                patch = patch.status(next);
                patch.completed_at = completed_at.map(Some);
                Some(next)
            }
            None => None,
        };

        match self.stores.deployments.update(deployment_id, patch).await {
            Ok(updated) => {
                info!(
                    deployment_id,
                    approver_id = %caller.id,
                    status = %updated.status,
                    "Decision recorded"
                );
                Ok(updated)
            }
            // a concurrent decision already closed the gate the same way
            Err(OrchestratorError::IllegalTransition { status, .. }) if Some(status) == target => {
                self.stores.deployments.require(deployment_id).await
            }
            Err(e) => Err(e),
        }
    }

    /// Defer the start of an approved deployment
    pub async fn schedule(
        &self,
        caller: &Caller,
        deployment_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Deployment, OrchestratorError> {
        caller.require(Permission::Execute)?;
        let deployment = self.stores.deployments.require(deployment_id).await?;
        caller.require_owner(&deployment.owner_id)?;

        let next = DeploymentFsm::transition(deployment.status, DeploymentCommand::Schedule)?;
        let mut patch = DeploymentPatch::new()
            .expect_status(&[deployment.status])
            .status(next)
            .append_log(journal::line(&format!(
                "scheduled by {} for {}",
                caller.name,
                at.to_rfc3339()
            )));
        patch.scheduled_at = Some(Some(at));

        let updated = self
            .apply(&deployment, DeploymentCommand::Schedule, patch)
            .await?;
        info!(deployment_id, scheduled_at = %at, "Deployment scheduled");
        Ok(updated)
    }

    /// Move a deployment to `deploying` and enqueue its execution
    pub async fn start(
        &self,
        caller: &Caller,
        deployment_id: &str,
        force: bool,
    ) -> Result<Deployment, OrchestratorError> {
        caller.require(Permission::Execute)?;
        let deployment = self.stores.deployments.require(deployment_id).await?;
        caller.require_owner(&deployment.owner_id)?;

        let command = DeploymentCommand::Start { force };
        let next = DeploymentFsm::transition(deployment.status, command)?;
        if self.gate.has_pending(deployment_id).await? {
            return Err(OrchestratorError::illegal(
                deployment.status,
                "approvals are still pending",
            ));
        }

        // a first run keeps what was recorded at creation; a re-run starts a fresh log
        let mut log = match deployment.started_at {
            None => deployment.log.clone(),
            Some(_) => String::new(),
        };
        log.push_str(&journal::line(&format!("deployment started by {}", caller.name)));
        if force {
            log.push_str(&journal::line("forced re-run"));
        }
        let patch = DeploymentPatch {
            status: Some(next),
            started_at: Some(Some(Utc::now())),
            completed_at: Some(None),
            duration: Some(None),
            result: Some(None),
            log: Some(log),
            ..DeploymentPatch::default()
        }
        .expect_status(&[deployment.status]);

        let updated = self.apply(&deployment, command, patch).await?;
        info!(deployment_id, "Deployment started");

        let job = ExecutionJob {
            deployment_id: deployment_id.to_string(),
            deploy_only: updated.is_rollback(),
        };
        if let Err(e) = self.jobs.enqueue(job) {
            error!(deployment_id, "Failed to enqueue execution: {}", e);
            return self
                .report_outcome(&ExecutionOutcome::failed(deployment_id, &e))
                .await;
        }

        Ok(updated)
    }

    /// Close a running deployment with its execution outcome.
    ///
    /// Idempotent: a report for a deployment that is no longer `deploying`
    /// returns the record unchanged.
    pub async fn report_outcome(
        &self,
        outcome: &ExecutionOutcome,
    ) -> Result<Deployment, OrchestratorError> {
        let id = outcome.deployment_id.as_str();
        let deployment = self.stores.deployments.require(id).await?;
        if deployment.status != DeploymentStatus::Deploying {
            debug!(
                deployment_id = id,
                status = %deployment.status,
                "Ignoring outcome for deployment that is not deploying"
            );
            return Ok(deployment);
        }

        let next = DeploymentFsm::transition(
            deployment.status,
            DeploymentCommand::Complete {
                success: outcome.success,
            },
        )?;
        let patch = DeploymentPatch {
            status: Some(next),
            completed_at: Some(Some(Utc::now())),
            duration: Some(Some(outcome.duration_secs)),
            result: Some(Some(outcome.result.clone())),
            append_log: Some(outcome.final_log.clone()),
            ..DeploymentPatch::default()
        }
        .expect_status(&[DeploymentStatus::Deploying]);

        let updated = match self.stores.deployments.update(id, patch).await {
            Ok(updated) => updated,
            Err(OrchestratorError::IllegalTransition { status, .. }) => {
                debug!(deployment_id = id, %status, "Deployment closed concurrently");
                return self.stores.deployments.require(id).await;
            }
            Err(e) => return Err(e),
        };

        info!(
            deployment_id = id,
            status = %updated.status,
            duration_secs = outcome.duration_secs,
            "Deployment finished"
        );

        if updated.status == DeploymentStatus::Success {
            if let Some(original_id) = &updated.rollback_of {
                self.mark_rolled_back(original_id, &updated).await?;
            }
        }

        Ok(updated)
    }

    /// Operator stop: mark failed now and signal the active run
    pub async fn stop(
        &self,
        caller: &Caller,
        deployment_id: &str,
    ) -> Result<Deployment, OrchestratorError> {
        caller.require(Permission::Execute)?;
        let deployment = self.stores.deployments.require(deployment_id).await?;
        caller.require_owner(&deployment.owner_id)?;

        let next = DeploymentFsm::transition(deployment.status, DeploymentCommand::Stop)?;
        let now = Utc::now();
        let duration = deployment
            .started_at
            .map(|started| (now - started).num_seconds().max(0) as u64);

        let patch = DeploymentPatch {
            status: Some(next),
            completed_at: Some(Some(now)),
            duration: Some(duration),
            append_log: Some(journal::line(&format!("manual stop by {}", caller.name))),
            ..DeploymentPatch::default()
        }
        .expect_status(&[deployment.status]);

        let updated = self
            .apply(&deployment, DeploymentCommand::Stop, patch)
            .await?;

        if self.runs.cancel(deployment_id) {
            info!(deployment_id, "Stop signalled to active run");
        }
        info!(deployment_id, "Deployment stopped");
        Ok(updated)
    }

    /// Start every scheduled deployment that is due
    pub async fn start_due(&self, now: DateTime<Utc>) -> Result<usize, OrchestratorError> {
        let due = self
            .stores
            .deployments
            .find_many(&DeploymentFilter {
                statuses: Some(vec![DeploymentStatus::Scheduled]),
                ..DeploymentFilter::default()
            })
            .await?
            .into_iter()
            .filter(|d| d.scheduled_at.is_none_or(|at| at <= now));

        let system = Caller::system();
        let mut started = 0;
        for deployment in due {
            match self.start(&system, &deployment.id, false).await {
                Ok(_) => started += 1,
                Err(e) => warn!(
                    deployment_id = %deployment.id,
                    "Failed to start scheduled deployment: {}",
                    e
                ),
            }
        }
        Ok(started)
    }

    /// Fail deployments left `deploying` without a run, e.g. after a restart
    pub async fn recover_interrupted(&self) -> Result<usize, OrchestratorError> {
        let stuck = self
            .stores
            .deployments
            .find_many(&DeploymentFilter {
                statuses: Some(vec![DeploymentStatus::Deploying]),
                ..DeploymentFilter::default()
            })
            .await?;

        let mut recovered = 0;
        for deployment in stuck
            .into_iter()
            .filter(|d| !self.runs.is_active(&d.id))
        {
            let error = OrchestratorError::Internal(
                "execution interrupted by orchestrator restart".to_string(),
            );
            let mut outcome = ExecutionOutcome::failed(&deployment.id, &error);
            outcome.duration_secs = deployment
                .started_at
                .map(|s| (Utc::now() - s).num_seconds().max(0) as u64)
                .unwrap_or(0);
            match self.report_outcome(&outcome).await {
                Ok(_) => recovered += 1,
                Err(e) => warn!(deployment_id = %deployment.id, "Failed to recover: {}", e),
            }
        }

        if recovered > 0 {
            warn!("Marked {} interrupted deployment(s) as failed", recovered);
        }
        Ok(recovered)
    }

    // ================================== QUERIES ================================== //

    pub async fn get(
        &self,
        caller: &Caller,
        deployment_id: &str,
    ) -> Result<Deployment, OrchestratorError> {
        caller.require(Permission::Read)?;
        self.stores.deployments.require(deployment_id).await
    }

    pub async fn list(
        &self,
        caller: &Caller,
        filter: &DeploymentFilter,
    ) -> Result<Vec<Deployment>, OrchestratorError> {
        caller.require(Permission::Read)?;
        self.stores.deployments.find_many(filter).await
    }

    pub async fn approvals(
        &self,
        caller: &Caller,
        deployment_id: &str,
    ) -> Result<Vec<Approval>, OrchestratorError> {
        caller.require(Permission::Read)?;
        self.stores.deployments.require(deployment_id).await?;
        let mut records = self.gate.records(deployment_id).await?;
        records.sort_by(|a, b| a.level.cmp(&b.level).then(a.created_at.cmp(&b.created_at)));
        Ok(records)
    }

    pub async fn status(
        &self,
        caller: &Caller,
        deployment_id: &str,
    ) -> Result<DeploymentStatusView, OrchestratorError> {
        let deployment = self.get(caller, deployment_id).await?;
        let current_stage = match deployment.status {
            DeploymentStatus::Deploying => self.stages.extract(&deployment.log),
            status => stage_label(status).to_string(),
        };
        Ok(DeploymentStatusView {
            status: deployment.status,
            current_stage,
            log: deployment.log,
            started_at: deployment.started_at,
            completed_at: deployment.completed_at,
            duration: deployment.duration,
        })
    }

    // ================================= INTERNALS ================================= //

    /// Write a transition patch; a lost race reports the transition as seen
    /// from the status that won
    async fn apply(
        &self,
        deployment: &Deployment,
        command: DeploymentCommand,
        patch: DeploymentPatch,
    ) -> Result<Deployment, OrchestratorError> {
        match self.stores.deployments.update(&deployment.id, patch).await {
            Err(OrchestratorError::IllegalTransition { status, message }) => {
                debug!(deployment_id = %deployment.id, %status, "Lost transition race: {}", message);
                DeploymentFsm::transition(status, command)?;
                Err(OrchestratorError::IllegalTransition { status, message })
            }
            result => result,
        }
    }

    pub(crate) async fn mark_rolled_back(
        &self,
        original_id: &str,
        rollback: &Deployment,
    ) -> Result<(), OrchestratorError> {
        let original = self.stores.deployments.require(original_id).await?;
        let next = match DeploymentFsm::transition(original.status, DeploymentCommand::MarkRolledBack)
        {
            Ok(next) => next,
            Err(e) => {
                debug!(deployment_id = original_id, "Not marking rolled back: {}", e);
                return Ok(());
            }
        };

        let patch = DeploymentPatch::new()
            .expect_status(&[original.status])
            .status(next)
            .append_log(journal::line(&format!(
                "rolled back by deployment {} (version {})",
                rollback.id,
                rollback.version.as_deref().unwrap_or("unknown")
            )));
        match self.stores.deployments.update(original_id, patch).await {
            Ok(_) => {
                info!(deployment_id = original_id, rollback_id = %rollback.id, "Deployment rolled back");
                Ok(())
            }
            Err(OrchestratorError::IllegalTransition { status, .. }) => {
                debug!(deployment_id = original_id, %status, "Original changed before roll back mark");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub(crate) fn notify_approvers(
        &self,
        caller: &Caller,
        deployment: &Deployment,
        approvals: &[Approval],
    ) {
        for approval in approvals {
            let event = ApprovalRequested {
                approval_id: approval.id.clone(),
                deployment_id: deployment.id.clone(),
                deployment_name: deployment.name.clone(),
                requester_id: caller.id.clone(),
                requester_name: caller.name.clone(),
                approver_id: approval.approver_id.clone(),
                level: approval.level,
            };
            let notifier = self.notifier.clone();
            tokio::spawn(async move {
                if let Err(e) = notifier.notify_approval_requested(&event).await {
                    warn!(
                        approval_id = %event.approval_id,
                        "Failed to send approval notification: {}",
                        e
                    );
                }
            });
        }
    }
}
