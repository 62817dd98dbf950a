//! Scheduler worker: starts scheduled deployments once they are due

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info};

use crate::deploy::controller::DeploymentController;

/// Scheduler worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Polling interval
    pub interval: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
        }
    }
}

/// Run the scheduler worker
pub async fn run<S, F>(
    options: &Options,
    controller: Arc<DeploymentController>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Scheduler worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Scheduler worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        debug!("Checking for due deployments...");

        match controller.start_due(Utc::now()).await {
            Ok(0) => {}
            Ok(started) => info!("Started {} scheduled deployment(s)", started),
            Err(e) => error!("Failed to start scheduled deployments: {}", e),
        }
    }
}
