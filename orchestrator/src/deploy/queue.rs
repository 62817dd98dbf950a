//! Execution job queue between the controller and the dispatcher

use tokio::sync::mpsc;

use crate::errors::OrchestratorError;

/// Request to execute one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionJob {
    pub deployment_id: String,

    /// Skip the build phase (rollbacks)
    pub deploy_only: bool,
}

/// Sending half, held by the controller
#[derive(Debug, Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<ExecutionJob>,
}

/// Receiving half, owned by the dispatcher worker
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::UnboundedReceiver<ExecutionJob>,
}

pub fn job_queue() -> (JobQueue, JobReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobQueue { tx }, JobReceiver { rx })
}

impl JobQueue {
    pub fn enqueue(&self, job: ExecutionJob) -> Result<(), OrchestratorError> {
        self.tx.send(job).map_err(|e| {
            OrchestratorError::Internal(format!(
                "execution queue closed, dropping job for {}",
                e.0.deployment_id
            ))
        })
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<ExecutionJob> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ExecutionJob> {
        self.rx.try_recv().ok()
    }
}
