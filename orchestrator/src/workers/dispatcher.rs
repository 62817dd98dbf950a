//! Execution dispatcher: drains the job queue into the execution coordinator

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::deploy::controller::DeploymentController;
use crate::deploy::executor::{ExecutionCoordinator, ExecutionOutcome};
use crate::deploy::queue::{ExecutionJob, JobReceiver};
use crate::errors::OrchestratorError;
use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Dispatcher worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Backoff between attempts to report an outcome
    pub report_cooldown: CooldownOptions,

    /// Attempts to report an outcome before giving up
    pub max_report_attempts: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            report_cooldown: CooldownOptions {
                base_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                multiplier: 2.0,
            },
            max_report_attempts: 5,
        }
    }
}

/// Run the dispatcher worker.
///
/// On shutdown it stops taking jobs and waits for the runs in flight.
pub async fn run<S, F>(
    options: &Options,
    controller: Arc<DeploymentController>,
    executor: Arc<ExecutionCoordinator>,
    mut jobs: JobReceiver,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F + Clone + Send + 'static,
    F: Future<Output = ()> + Send,
{
    info!("Dispatcher worker starting...");

    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Dispatcher worker shutting down...");
                break;
            }
            job = jobs.recv() => {
                let Some(job) = job else {
                    info!("Job queue closed, dispatcher worker stopping...");
                    break;
                };
                debug!(deployment_id = %job.deployment_id, "Dispatching execution job");
                let options = options.clone();
                let controller = controller.clone();
                let executor = executor.clone();
                let sleep_fn = sleep_fn.clone();
                in_flight.spawn(async move {
                    handle_job(&options, &controller, executor, job, sleep_fn).await;
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = joined {
                    error!("Dispatch task ended abnormally: {}", e);
                }
            }
        }
    }

    if !in_flight.is_empty() {
        info!("Waiting for {} execution(s) to finish...", in_flight.len());
    }
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("Dispatch task ended abnormally: {}", e);
        }
    }
}

/// Execute one job and report its outcome.
///
/// The execution runs on its own task so that a panic still produces a
/// failed outcome instead of leaving the deployment `deploying`.
pub async fn handle_job<S, F>(
    options: &Options,
    controller: &DeploymentController,
    executor: Arc<ExecutionCoordinator>,
    job: ExecutionJob,
    sleep_fn: S,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let deployment_id = job.deployment_id.clone();
    let outcome = match tokio::spawn(async move { executor.execute(&job).await }).await {
        Ok(Some(outcome)) => outcome,
        Ok(None) => return,
        Err(e) => {
            error!(deployment_id = %deployment_id, "Execution task failed: {}", e);
            ExecutionOutcome::failed(
                &deployment_id,
                &OrchestratorError::Internal(format!("execution task failed: {}", e)),
            )
        }
    };

    report_with_retry(options, controller, &outcome, sleep_fn).await;
}

async fn report_with_retry<S, F>(
    options: &Options,
    controller: &DeploymentController,
    outcome: &ExecutionOutcome,
    sleep_fn: S,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    for attempt in 0..options.max_report_attempts.max(1) {
        match controller.report_outcome(outcome).await {
            Ok(deployment) => {
                debug!(
                    deployment_id = %deployment.id,
                    status = %deployment.status,
                    "Outcome reported"
                );
                return;
            }
            Err(OrchestratorError::NotFound(e)) => {
                warn!(deployment_id = %outcome.deployment_id, "Dropping outcome: {}", e);
                return;
            }
            Err(e) => {
                let delay = calc_exp_backoff(&options.report_cooldown, attempt);
                warn!(
                    deployment_id = %outcome.deployment_id,
                    attempt = attempt + 1,
                    "Failed to report outcome, retrying in {:?}: {}",
                    delay,
                    e
                );
                sleep_fn(delay).await;
            }
        }
    }

    error!(
        deployment_id = %outcome.deployment_id,
        "Giving up reporting outcome after {} attempts",
        options.max_report_attempts
    );
}
