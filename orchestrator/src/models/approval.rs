//! Approval models

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::storage::repository::Record;
use crate::utils::generate_uuid;

/// Approval decision status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }
}

/// An approver's verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    #[serde(alias = "approved")]
    Approve,
    #[serde(alias = "rejected")]
    Reject,
}

impl Decision {
    pub fn status(&self) -> ApprovalStatus {
        match self {
            Decision::Approve => ApprovalStatus::Approved,
            Decision::Reject => ApprovalStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "approve" | "approved" => Ok(Decision::Approve),
            "reject" | "rejected" => Ok(Decision::Reject),
            _ => Err(OrchestratorError::ValidationError(format!(
                "Invalid decision: {}",
                s
            ))),
        }
    }
}

/// One approver's decision on one deployment at one escalation level
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub id: String,
    pub deployment_id: String,
    pub approver_id: String,

    /// Escalation level, ascending from 1
    pub level: u32,

    pub status: ApprovalStatus,

    #[serde(default)]
    pub comment: Option<String>,

    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Approval {
    /// Create a pending approval record
    pub fn pending(deployment_id: &str, approver_id: &str, level: u32) -> Self {
        Self {
            id: generate_uuid(),
            deployment_id: deployment_id.to_string(),
            approver_id: approver_id.to_string(),
            level,
            status: ApprovalStatus::Pending,
            comment: None,
            decided_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Resolves a pending approval exactly once
#[derive(Debug, Clone)]
pub struct ApprovalPatch {
    pub decision: Decision,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ApprovalFilter {
    pub deployment_id: Option<String>,
    pub approver_id: Option<String>,
    pub level: Option<u32>,
    pub status: Option<ApprovalStatus>,
}

impl ApprovalFilter {
    pub fn for_deployment(deployment_id: &str) -> Self {
        Self {
            deployment_id: Some(deployment_id.to_string()),
            ..Self::default()
        }
    }
}

impl Record for Approval {
    type Patch = ApprovalPatch;
    type Filter = ApprovalFilter;

    const KIND: &'static str = "approval";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, patch: ApprovalPatch) -> Result<(), OrchestratorError> {
        if self.status != ApprovalStatus::Pending {
            return Err(OrchestratorError::NotFound(format!(
                "pending approval {} (already {})",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = patch.decision.status();
        self.comment = patch.comment;
        self.decided_at = Some(Utc::now());
        Ok(())
    }

    fn matches(&self, filter: &ApprovalFilter) -> bool {
        filter
            .deployment_id
            .as_ref()
            .is_none_or(|d| *d == self.deployment_id)
            && filter
                .approver_id
                .as_ref()
                .is_none_or(|a| *a == self.approver_id)
            && filter.level.is_none_or(|l| l == self.level)
            && filter.status.is_none_or(|s| s == self.status)
    }
}
