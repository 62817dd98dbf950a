//! Host probe worker: refreshes the cached connectivity of remote hosts

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use crate::errors::OrchestratorError;
use crate::models::host::{Host, HostFilter, HostPatch, HostStatus};
use crate::storage::repository::Repository;

/// Host probe worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between probe rounds
    pub interval: Duration,

    /// TCP connect timeout per host
    pub timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(120),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Run the host probe worker
pub async fn run<S, F>(
    options: &Options,
    hosts: Arc<dyn Repository<Host>>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    info!("Host probe worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Host probe worker shutting down...");
                return;
            }
            _ = sleep_fn(options.interval) => {}
        }

        if let Err(e) = probe_all(hosts.as_ref(), options.timeout).await {
            error!("Host probe round failed: {}", e);
        }
    }
}

/// Probe every remote host once and record the result
pub async fn probe_all(
    hosts: &dyn Repository<Host>,
    timeout: Duration,
) -> Result<usize, OrchestratorError> {
    let targets: Vec<Host> = hosts
        .find_many(&HostFilter::default())
        .await?
        .into_iter()
        .filter(|h| !h.is_local())
        .collect();

    let results = join_all(targets.iter().map(|host| async move {
        (host, probe(host, timeout).await)
    }))
    .await;

    for (host, status) in &results {
        if host.status != *status {
            info!(host = %host.id, from = ?host.status, to = ?status, "Host status changed");
        }
        if let Err(e) = hosts.update(&host.id, HostPatch::now(*status)).await {
            warn!(host = %host.id, "Failed to record host status: {}", e);
        }
    }

    debug!("Probed {} host(s)", results.len());
    Ok(results.len())
}

/// TCP reachability of the host's ssh port
pub async fn probe(host: &Host, timeout: Duration) -> HostStatus {
    let address = (host.address.as_str(), host.port);
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => HostStatus::Online,
        Ok(Err(e)) => {
            debug!(host = %host.id, "Probe failed: {}", e);
            HostStatus::Unreachable
        }
        Err(_) => {
            debug!(host = %host.id, "Probe timed out");
            HostStatus::Unreachable
        }
    }
}
