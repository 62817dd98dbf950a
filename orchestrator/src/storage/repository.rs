//! Repository interface consumed by the orchestration core

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::OrchestratorError;
use crate::models::approval::Approval;
use crate::models::deployment::Deployment;
use crate::models::host::Host;
use crate::models::project::Project;

/// A record type that can live in a [`Repository`].
///
/// Updates are expressed as a typed patch that is applied to a copy of the
/// stored record; the store only commits the copy when `apply` succeeds, which
/// makes every update atomic per record.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Partial update applied by [`Repository::update`]
    type Patch: Send + 'static;

    /// Filter accepted by [`Repository::find_many`] and [`Repository::count`]
    type Filter: Send + Sync;

    /// Human-readable record kind, used in error messages
    const KIND: &'static str;

    fn id(&self) -> &str;

    fn apply(&mut self, patch: Self::Patch) -> Result<(), OrchestratorError>;

    fn matches(&self, filter: &Self::Filter) -> bool;
}

/// CRUD access to one record collection
#[async_trait]
pub trait Repository<T: Record>: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<T>, OrchestratorError>;

    async fn create(&self, record: T) -> Result<T, OrchestratorError>;

    async fn update(&self, id: &str, patch: T::Patch) -> Result<T, OrchestratorError>;

    async fn find_many(&self, filter: &T::Filter) -> Result<Vec<T>, OrchestratorError>;

    async fn count(&self, filter: &T::Filter) -> Result<usize, OrchestratorError> {
        Ok(self.find_many(filter).await?.len())
    }

    /// Get a record or fail with `NotFound`
    async fn require(&self, id: &str) -> Result<T, OrchestratorError> {
        self.get(id)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("{} {}", T::KIND, id)))
    }
}

/// The record collections the orchestrator works with
#[derive(Clone)]
pub struct Stores {
    pub deployments: Arc<dyn Repository<Deployment>>,
    pub approvals: Arc<dyn Repository<Approval>>,
    pub projects: Arc<dyn Repository<Project>>,
    pub hosts: Arc<dyn Repository<Host>>,
}
