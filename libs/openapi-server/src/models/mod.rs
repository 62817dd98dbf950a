//! Wire models of the deployd HTTP API.
//!
//! Enumerations travel as their lowercase string names so that clients do
//! not depend on the orchestrator's internal types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ================================== SYSTEM =================================== //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: String,
    pub git_commit: String,
    pub build_time: String,
}

/// Body of every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error kind, e.g. `illegal_transition`
    pub error: String,
    pub message: String,

    /// Current deployment status, set on illegal transitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

// ================================= REQUESTS ================================== //

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDeploymentRequest {
    pub project_id: String,
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// `dev`, `test`, `staging` or `prod`; defaults to the project's
    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub version: Option<String>,

    #[serde(default)]
    pub host_id: Option<String>,

    #[serde(default)]
    pub require_approval: Option<bool>,

    /// Level 1 approvers; the admin pool when empty
    #[serde(default)]
    pub approvers: Vec<String>,

    /// Level 2 approvers
    #[serde(default)]
    pub escalation_approvers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddApproversRequest {
    #[serde(default = "default_level")]
    pub level: u32,
    pub approver_ids: Vec<String>,
}

fn default_level() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRequest {
    /// `approve` or `reject`
    pub decision: String,

    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartRequest {
    /// Re-run a deployment that already succeeded
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    pub target_version: String,

    #[serde(default)]
    pub reason: String,

    /// `immediate` (default) or `scheduled`
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Query string of the deployment list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeploymentListQuery {
    #[serde(default)]
    pub project_id: Option<String>,

    #[serde(default)]
    pub environment: Option<String>,

    #[serde(default)]
    pub owner_id: Option<String>,

    /// Comma separated statuses
    #[serde(default)]
    pub status: Option<String>,
}

// ================================= RESPONSES ================================= //

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResultResponse {
    pub mode: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub verify_output: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResponse {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub environment: String,
    pub version: Option<String>,
    pub build_number: Option<u64>,
    pub status: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
    pub log: String,
    pub result: Option<ExecutionResultResponse>,
    pub owner_id: String,
    pub host_id: Option<String>,
    pub rollback_of: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentListResponse {
    pub deployments: Vec<DeploymentResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentStatusResponse {
    pub status: String,
    pub current_stage: String,
    pub log: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub id: String,
    pub deployment_id: String,
    pub approver_id: String,
    pub level: u32,
    pub status: String,
    pub comment: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalListResponse {
    pub approvals: Vec<ApprovalResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackResponse {
    pub rollback_deployment: DeploymentResponse,
    pub original_deployment: DeploymentResponse,
}
