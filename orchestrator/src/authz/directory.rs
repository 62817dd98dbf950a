//! Approver directory

use async_trait::async_trait;

use crate::errors::OrchestratorError;
use crate::storage::settings::ApproverSettings;

/// A user who may sign off deployments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approver {
    pub id: String,
    pub name: String,
}

/// Lookup of the admin pool used when a deployment names no approvers
#[async_trait]
pub trait ApproverDirectory: Send + Sync {
    async fn admins(&self) -> Result<Vec<Approver>, OrchestratorError>;
}

/// Directory backed by the settings file
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    admins: Vec<Approver>,
}

impl StaticDirectory {
    pub fn new(admins: Vec<Approver>) -> Self {
        Self { admins }
    }

    pub fn from_settings(admins: &[ApproverSettings]) -> Self {
        Self::new(
            admins
                .iter()
                .map(|a| Approver {
                    id: a.id.clone(),
                    name: if a.name.is_empty() {
                        a.id.clone()
                    } else {
                        a.name.clone()
                    },
                })
                .collect(),
        )
    }
}

#[async_trait]
impl ApproverDirectory for StaticDirectory {
    async fn admins(&self) -> Result<Vec<Approver>, OrchestratorError> {
        Ok(self.admins.clone())
    }
}
