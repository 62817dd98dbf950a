//! Approval gate: the decision ledger over a deployment's approval records

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::models::approval::{Approval, ApprovalFilter, ApprovalPatch, ApprovalStatus, Decision};
use crate::storage::repository::Repository;

/// Aggregate state of a deployment's approvals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Satisfied,
    Rejected,
    Pending,
}

/// Evaluate a record set; an empty set is satisfied and any rejection wins
pub fn evaluate(records: &[Approval]) -> GateState {
    if records.iter().any(|a| a.status == ApprovalStatus::Rejected) {
        GateState::Rejected
    } else if records.iter().all(|a| a.status == ApprovalStatus::Approved) {
        GateState::Satisfied
    } else {
        GateState::Pending
    }
}

pub struct ApprovalGate {
    approvals: Arc<dyn Repository<Approval>>,
    // serializes check-then-write sequences on the ledger
    write_lock: Mutex<()>,
}

impl ApprovalGate {
    pub fn new(approvals: Arc<dyn Repository<Approval>>) -> Self {
        Self {
            approvals,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn records(&self, deployment_id: &str) -> Result<Vec<Approval>, OrchestratorError> {
        self.approvals
            .find_many(&ApprovalFilter::for_deployment(deployment_id))
            .await
    }

    /// Add one pending record per distinct approver at `level`.
    ///
    /// Approvers that already hold a record at that level are skipped. Returns
    /// the records created.
    pub async fn add_approvers(
        &self,
        deployment_id: &str,
        level: u32,
        approver_ids: &[String],
    ) -> Result<Vec<Approval>, OrchestratorError> {
        if level == 0 {
            return Err(OrchestratorError::ValidationError(
                "approval level starts at 1".to_string(),
            ));
        }
        if approver_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(OrchestratorError::ValidationError(
                "approver id must not be empty".to_string(),
            ));
        }

        let _guard = self.write_lock.lock().await;

        let existing = self
            .approvals
            .find_many(&ApprovalFilter {
                deployment_id: Some(deployment_id.to_string()),
                level: Some(level),
                ..ApprovalFilter::default()
            })
            .await?;
        let mut seen: HashSet<&str> = existing.iter().map(|a| a.approver_id.as_str()).collect();

        let mut created = Vec::new();
        for approver_id in approver_ids {
            let approver_id = approver_id.trim();
            if !seen.insert(approver_id) {
                debug!(deployment_id, approver_id, level, "Approver already assigned");
                continue;
            }
            let record = self
                .approvals
                .create(Approval::pending(deployment_id, approver_id, level))
                .await?;
            created.push(record);
        }

        info!(
            deployment_id,
            level,
            count = created.len(),
            "Approvers added"
        );
        Ok(created)
    }

    /// Record a decision on the approver's pending record at `level`
    pub async fn decide(
        &self,
        deployment_id: &str,
        approver_id: &str,
        level: u32,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<Approval, OrchestratorError> {
        let _guard = self.write_lock.lock().await;
        self.decide_locked(deployment_id, approver_id, Some(level), decision, comment)
            .await
    }

    /// Record a decision on the approver's lowest pending level
    pub async fn decide_next(
        &self,
        deployment_id: &str,
        approver_id: &str,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<Approval, OrchestratorError> {
        let _guard = self.write_lock.lock().await;
        self.decide_locked(deployment_id, approver_id, None, decision, comment)
            .await
    }

    async fn decide_locked(
        &self,
        deployment_id: &str,
        approver_id: &str,
        level: Option<u32>,
        decision: Decision,
        comment: Option<String>,
    ) -> Result<Approval, OrchestratorError> {
        let records = self.records(deployment_id).await?;

        let record = records
            .iter()
            .filter(|a| {
                a.approver_id == approver_id
                    && a.status == ApprovalStatus::Pending
                    && level.is_none_or(|l| l == a.level)
            })
            .min_by_key(|a| a.level)
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!(
                    "pending approval for {} on deployment {}",
                    approver_id, deployment_id
                ))
            })?;

        if let Some(blocking) = records
            .iter()
            .find(|a| a.level < record.level && a.status != ApprovalStatus::Approved)
        {
            return Err(OrchestratorError::ValidationError(format!(
                "approval level {} is not open: level {} is {}",
                record.level,
                blocking.level,
                blocking.status.as_str()
            )));
        }

        let updated = self
            .approvals
            .update(&record.id, ApprovalPatch { decision, comment })
            .await?;

        info!(
            deployment_id,
            approver_id,
            level = updated.level,
            status = updated.status.as_str(),
            "Approval decided"
        );
        Ok(updated)
    }

    pub async fn evaluate(&self, deployment_id: &str) -> Result<GateState, OrchestratorError> {
        Ok(evaluate(&self.records(deployment_id).await?))
    }

    pub async fn is_satisfied(&self, deployment_id: &str) -> Result<bool, OrchestratorError> {
        Ok(self.evaluate(deployment_id).await? == GateState::Satisfied)
    }

    pub async fn is_rejected(&self, deployment_id: &str) -> Result<bool, OrchestratorError> {
        Ok(self.evaluate(deployment_id).await? == GateState::Rejected)
    }

    pub async fn has_pending(&self, deployment_id: &str) -> Result<bool, OrchestratorError> {
        Ok(self
            .records(deployment_id)
            .await?
            .iter()
            .any(|a| a.status == ApprovalStatus::Pending))
    }
}
