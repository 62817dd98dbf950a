//! Deployment models

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::storage::repository::Record;

/// Deployment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Waiting on the approval gate
    PendingApproval,

    /// Cleared to start
    Approved,

    /// Vetoed by an approver
    Rejected,

    /// Waiting for its scheduled time
    Scheduled,

    /// Build/deploy in progress
    Deploying,

    /// Finished successfully
    Success,

    /// Finished with an error, or stopped by an operator
    Failed,

    /// Superseded by a successful rollback
    RolledBack,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::PendingApproval => "pending_approval",
            DeploymentStatus::Approved => "approved",
            DeploymentStatus::Rejected => "rejected",
            DeploymentStatus::Scheduled => "scheduled",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
        }
    }

    /// Whether the status closes the deployment
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Rejected
                | DeploymentStatus::Success
                | DeploymentStatus::Failed
                | DeploymentStatus::RolledBack
        )
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending_approval" => Ok(DeploymentStatus::PendingApproval),
            "approved" => Ok(DeploymentStatus::Approved),
            "rejected" => Ok(DeploymentStatus::Rejected),
            "scheduled" => Ok(DeploymentStatus::Scheduled),
            "deploying" => Ok(DeploymentStatus::Deploying),
            "success" => Ok(DeploymentStatus::Success),
            "failed" => Ok(DeploymentStatus::Failed),
            "rolled_back" => Ok(DeploymentStatus::RolledBack),
            _ => Err(OrchestratorError::ValidationError(format!(
                "Invalid deployment status: {}",
                s
            ))),
        }
    }
}

/// Target environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[serde(alias = "development")]
    Dev,
    Test,
    Staging,
    #[serde(alias = "production")]
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" | "development" => Ok(Environment::Dev),
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "prod" | "production" => Ok(Environment::Prod),
            _ => Err(OrchestratorError::ValidationError(format!(
                "Invalid environment: {}",
                s
            ))),
        }
    }
}

/// Where the deploy step ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Local,
    Remote,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Local => "local",
            ExecutionMode::Remote => "remote",
        }
    }
}

/// Why an execution failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Connection,
    Execution,
    Timeout,
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connection => "connection",
            FailureKind::Execution => "execution",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl From<&OrchestratorError> for FailureKind {
    fn from(err: &OrchestratorError) -> Self {
        match err {
            OrchestratorError::ConnectionError(_) => FailureKind::Connection,
            OrchestratorError::ExecutionError(_) => FailureKind::Execution,
            OrchestratorError::Timeout(_) => FailureKind::Timeout,
            OrchestratorError::Cancelled(_) => FailureKind::Cancelled,
            _ => FailureKind::Internal,
        }
    }
}

/// Structured result of one execution run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub mode: ExecutionMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_output: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verify_output: Option<String>,

    /// Exit code of the last script that ran to completion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
}

impl ExecutionResult {
    pub fn new(mode: ExecutionMode) -> Self {
        Self {
            mode,
            build_output: None,
            deploy_output: None,
            verify_output: None,
            exit_code: None,
            error_kind: None,
        }
    }
}

/// One attempt to ship a version of a project to an environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub project_id: String,
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub environment: Environment,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub build_number: Option<u64>,

    pub status: DeploymentStatus,

    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall-clock duration in seconds
    #[serde(default)]
    pub duration: Option<u64>,

    /// Append-only execution log, one `[timestamp] message` per line
    #[serde(default)]
    pub log: String,

    #[serde(default)]
    pub result: Option<ExecutionResult>,

    pub owner_id: String,

    /// Per-deployment target override of the project's host
    #[serde(default)]
    pub host_id: Option<String>,

    /// Deployment this one rolls back
    #[serde(default)]
    pub rollback_of: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deployment {
    pub fn is_rollback(&self) -> bool {
        self.rollback_of.is_some()
    }
}

/// Partial deployment update.
///
/// `expect_status` turns the update into a compare-and-set: the patch is
/// refused with `IllegalTransition` unless the stored status is one of them.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub expect_status: Option<Vec<DeploymentStatus>>,
    pub status: Option<DeploymentStatus>,
    pub scheduled_at: Option<Option<DateTime<Utc>>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub duration: Option<Option<u64>>,
    pub result: Option<Option<ExecutionResult>>,
    /// Replaces the log; applied before `append_log`
    pub log: Option<String>,
    pub append_log: Option<String>,
}

impl DeploymentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Patch that only appends to the log
    pub fn append(text: impl Into<String>) -> Self {
        Self {
            append_log: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn expect_status(mut self, statuses: &[DeploymentStatus]) -> Self {
        self.expect_status = Some(statuses.to_vec());
        self
    }

    pub fn status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn append_log(mut self, text: impl Into<String>) -> Self {
        match self.append_log.as_mut() {
            Some(existing) => existing.push_str(&text.into()),
            None => self.append_log = Some(text.into()),
        }
        self
    }
}

/// Deployment query filter; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    pub project_id: Option<String>,
    pub environment: Option<Environment>,
    pub statuses: Option<Vec<DeploymentStatus>>,
    pub owner_id: Option<String>,
    pub rollbacks_only: bool,
}

impl Record for Deployment {
    type Patch = DeploymentPatch;
    type Filter = DeploymentFilter;

    const KIND: &'static str = "deployment";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, patch: DeploymentPatch) -> Result<(), OrchestratorError> {
        if let Some(expected) = &patch.expect_status {
            if !expected.contains(&self.status) {
                return Err(OrchestratorError::illegal(
                    self.status,
                    format!("deployment {} changed concurrently", self.id),
                ));
            }
        }

        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(scheduled_at) = patch.scheduled_at {
            self.scheduled_at = scheduled_at;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = started_at;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(duration) = patch.duration {
            self.duration = duration;
        }
        if let Some(result) = patch.result {
            self.result = result;
        }
        if let Some(log) = patch.log {
            self.log = log;
        }
        if let Some(text) = patch.append_log {
            self.log.push_str(&text);
        }

        if self.completed_at.is_some() && !self.status.is_terminal() {
            return Err(OrchestratorError::Internal(format!(
                "deployment {} would be completed while {}",
                self.id, self.status
            )));
        }
        if let (Some(started), Some(completed)) = (self.started_at, self.completed_at) {
            if completed < started {
                self.completed_at = Some(started);
            }
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    fn matches(&self, filter: &DeploymentFilter) -> bool {
        filter.project_id.as_ref().is_none_or(|p| *p == self.project_id)
            && filter.environment.is_none_or(|e| e == self.environment)
            && filter
                .statuses
                .as_ref()
                .is_none_or(|s| s.contains(&self.status))
            && filter.owner_id.as_ref().is_none_or(|o| *o == self.owner_id)
            && (!filter.rollbacks_only || self.is_rollback())
    }
}
