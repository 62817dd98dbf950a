//! Registry of active execution runs

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::{debug, warn};

/// Tracks which deployments have a run in flight and lets `stop` signal them
#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, watch::Sender<bool>>>,
}

/// Held by the executing task; unregisters the run on drop
#[derive(Debug)]
pub struct RunGuard {
    registry: Arc<RunRegistry>,
    deployment_id: String,
    cancel: watch::Receiver<bool>,
}

impl RunGuard {
    /// Receiver that flips to `true` when the run should stop
    pub fn cancel_signal(&self) -> watch::Receiver<bool> {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.deployment_id);
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a run; `None` when one is already active for the deployment
    pub fn register(self: &Arc<Self>, deployment_id: &str) -> Option<RunGuard> {
        let mut runs = match self.runs.lock() {
            Ok(runs) => runs,
            Err(poisoned) => poisoned.into_inner(),
        };
        if runs.contains_key(deployment_id) {
            debug!(deployment_id, "Run already registered");
            return None;
        }
        let (tx, rx) = watch::channel(false);
        runs.insert(deployment_id.to_string(), tx);
        Some(RunGuard {
            registry: Arc::clone(self),
            deployment_id: deployment_id.to_string(),
            cancel: rx,
        })
    }

    /// Signal the active run to stop; returns whether one was found
    pub fn cancel(&self, deployment_id: &str) -> bool {
        let runs = match self.runs.lock() {
            Ok(runs) => runs,
            Err(poisoned) => poisoned.into_inner(),
        };
        match runs.get(deployment_id) {
            Some(tx) => {
                if tx.send(true).is_err() {
                    warn!(deployment_id, "Run cancel signal had no receiver");
                }
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, deployment_id: &str) -> bool {
        match self.runs.lock() {
            Ok(runs) => runs.contains_key(deployment_id),
            Err(poisoned) => poisoned.into_inner().contains_key(deployment_id),
        }
    }

    fn remove(&self, deployment_id: &str) {
        let mut runs = match self.runs.lock() {
            Ok(runs) => runs,
            Err(poisoned) => poisoned.into_inner(),
        };
        runs.remove(deployment_id);
    }
}
