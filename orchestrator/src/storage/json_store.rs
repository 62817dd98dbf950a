//! In-process record store with optional JSON snapshot persistence

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::storage::repository::{Record, Repository};

struct Inner<T> {
    records: HashMap<String, T>,
    /// Insertion order, so listings are stable
    order: Vec<String>,
}

/// Repository backed by a map, snapshotted to a JSON file after every write
pub struct JsonStore<T: Record> {
    inner: RwLock<Inner<T>>,
    snapshot: Option<File>,
}

impl<T: Record> JsonStore<T> {
    /// Create a store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                order: Vec::new(),
            }),
            snapshot: None,
        }
    }

    /// Create a store seeded with records, without persistence
    pub fn with_records(records: impl IntoIterator<Item = T>) -> Self {
        let mut map = HashMap::new();
        let mut order = Vec::new();
        for record in records {
            let id = record.id().to_string();
            if map.insert(id.clone(), record).is_none() {
                order.push(id);
            }
        }
        Self {
            inner: RwLock::new(Inner {
                records: map,
                order,
            }),
            snapshot: None,
        }
    }

    /// Open a persistent store, loading the snapshot if it exists
    pub async fn open(snapshot: File) -> Result<Self, OrchestratorError> {
        let records: Vec<T> = if snapshot.exists().await {
            snapshot.read_json().await.map_err(|e| {
                OrchestratorError::StorageError(format!(
                    "failed to load {}: {}",
                    snapshot.path().display(),
                    e
                ))
            })?
        } else {
            Vec::new()
        };

        info!(
            "Loaded {} {} record(s) from {}",
            records.len(),
            T::KIND,
            snapshot.path().display()
        );

        let store = Self::with_records(records);
        Ok(Self {
            snapshot: Some(snapshot),
            ..store
        })
    }

    async fn persist(&self, inner: &Inner<T>) -> Result<(), OrchestratorError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };

        let records: Vec<&T> = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .collect();
        let contents = serde_json::to_vec_pretty(&records)?;
        snapshot.write_atomic(&contents).await.map_err(|e| {
            OrchestratorError::StorageError(format!(
                "failed to persist {}: {}",
                snapshot.path().display(),
                e
            ))
        })?;
        debug!("Persisted {} {} record(s)", records.len(), T::KIND);
        Ok(())
    }
}

#[async_trait]
impl<T: Record> Repository<T> for JsonStore<T> {
    async fn get(&self, id: &str) -> Result<Option<T>, OrchestratorError> {
        let inner = self.inner.read().await;
        Ok(inner.records.get(id).cloned())
    }

    async fn create(&self, record: T) -> Result<T, OrchestratorError> {
        let mut inner = self.inner.write().await;
        let id = record.id().to_string();
        if inner.records.contains_key(&id) {
            return Err(OrchestratorError::ValidationError(format!(
                "{} {} already exists",
                T::KIND,
                id
            )));
        }
        inner.records.insert(id.clone(), record.clone());
        inner.order.push(id);
        self.persist(&inner).await?;
        Ok(record)
    }

    async fn update(&self, id: &str, patch: T::Patch) -> Result<T, OrchestratorError> {
        let mut inner = self.inner.write().await;
        let current = inner
            .records
            .get(id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("{} {}", T::KIND, id)))?;

        let mut updated = current.clone();
        updated.apply(patch)?;
        inner.records.insert(id.to_string(), updated.clone());
        self.persist(&inner).await?;
        Ok(updated)
    }

    async fn find_many(&self, filter: &T::Filter) -> Result<Vec<T>, OrchestratorError> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id))
            .filter(|record| record.matches(filter))
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &T::Filter) -> Result<usize, OrchestratorError> {
        let inner = self.inner.read().await;
        Ok(inner
            .records
            .values()
            .filter(|record| record.matches(filter))
            .count())
    }
}
