//! Storage: repository interface, record store, on-disk layout and settings

pub mod json_store;
pub mod layout;
pub mod repository;
pub mod settings;

use std::sync::Arc;

use crate::errors::OrchestratorError;
use crate::models::approval::Approval;
use crate::models::deployment::Deployment;
use crate::models::host::Host;
use crate::models::project::Project;
use crate::storage::json_store::JsonStore;
use crate::storage::layout::StorageLayout;
use crate::storage::repository::Stores;

impl Stores {
    /// Stores that live only in memory
    pub fn in_memory() -> Self {
        Self {
            deployments: Arc::new(JsonStore::<Deployment>::in_memory()),
            approvals: Arc::new(JsonStore::<Approval>::in_memory()),
            projects: Arc::new(JsonStore::<Project>::in_memory()),
            hosts: Arc::new(JsonStore::<Host>::in_memory()),
        }
    }

    /// Stores snapshotted under the layout's data directory
    pub async fn open(layout: &StorageLayout) -> Result<Self, OrchestratorError> {
        layout.data_dir().create().await?;
        Ok(Self {
            deployments: Arc::new(JsonStore::<Deployment>::open(layout.deployments_file()).await?),
            approvals: Arc::new(JsonStore::<Approval>::open(layout.approvals_file()).await?),
            projects: Arc::new(JsonStore::<Project>::open(layout.projects_file()).await?),
            hosts: Arc::new(JsonStore::<Host>::open(layout.hosts_file()).await?),
        })
    }
}
