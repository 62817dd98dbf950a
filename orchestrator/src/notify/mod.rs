//! Approval notifications

pub mod webhook;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::errors::OrchestratorError;

/// An approver was asked to sign off a deployment
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequested {
    pub approval_id: String,
    pub deployment_id: String,
    pub deployment_name: String,
    pub requester_id: String,
    pub requester_name: String,
    pub approver_id: String,
    pub level: u32,
}

/// Fire-and-forget notification delivery.
///
/// Callers log failures and carry on; a notification never fails the
/// operation that triggered it.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify_approval_requested(
        &self,
        event: &ApprovalRequested,
    ) -> Result<(), OrchestratorError>;
}

/// Sink that only writes to the service log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify_approval_requested(
        &self,
        event: &ApprovalRequested,
    ) -> Result<(), OrchestratorError> {
        info!(
            approval_id = %event.approval_id,
            deployment_id = %event.deployment_id,
            approver_id = %event.approver_id,
            level = event.level,
            "Approval requested by {} for deployment {}",
            event.requester_name,
            event.deployment_name
        );
        Ok(())
    }
}
