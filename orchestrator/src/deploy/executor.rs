//! Execution coordinator: runs one deployment's build, deploy and verify phases

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::deploy::journal::{self, Stage};
use crate::deploy::queue::ExecutionJob;
use crate::deploy::runner::{OutputLine, OutputStream, RunOptions, ScriptRunner};
use crate::deploy::runs::{RunGuard, RunRegistry};
use crate::deploy::ssh::RemoteSession;
use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::models::deployment::{
    Deployment, DeploymentPatch, DeploymentStatus, ExecutionMode, ExecutionResult, FailureKind,
};
use crate::models::host::{Host, HostPatch, HostStatus};
use crate::models::project::Project;
use crate::storage::repository::{Repository, Stores};
use crate::storage::settings::ExecutionSettings;

/// Terminal result of one run, handed to `report_outcome`
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub deployment_id: String,
    pub success: bool,
    pub duration_secs: u64,
    /// Closing log segment
    pub final_log: String,
    pub result: ExecutionResult,
}

impl ExecutionOutcome {
    /// Failed outcome for a run that never produced one
    pub fn failed(deployment_id: &str, error: &OrchestratorError) -> Self {
        let mut result = ExecutionResult::new(ExecutionMode::Local);
        result.error_kind = Some(FailureKind::from(error));
        Self {
            deployment_id: deployment_id.to_string(),
            success: false,
            duration_secs: 0,
            final_log: journal::line(&format!("deployment failed: {}", error)),
            result,
        }
    }
}

/// Forwards progress notes and script output to the single log writer
#[derive(Clone)]
struct LogSink {
    tx: mpsc::UnboundedSender<OutputLine>,
}

impl LogSink {
    fn note(&self, message: &str) {
        // the writer only goes away once the run is over
        let _ = self.tx.send(OutputLine {
            stream: OutputStream::Stdout,
            text: message.to_string(),
        });
    }

    fn stage(&self, stage: Stage, message: &str) {
        self.note(&format!("{} {}", stage.marker(), message));
    }
}

pub struct ExecutionCoordinator {
    stores: Stores,
    runner: ScriptRunner,
    runs: Arc<RunRegistry>,
    workspaces: Dir,
    http: reqwest::Client,
    settings: ExecutionSettings,
}

impl ExecutionCoordinator {
    pub fn new(
        stores: Stores,
        runs: Arc<RunRegistry>,
        workspaces: Dir,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            stores,
            runner: ScriptRunner::new(settings.shell.clone()),
            runs,
            workspaces,
            http: reqwest::Client::new(),
            settings,
        }
    }

    /// Execute a job.
    ///
    /// Returns `None` when the job is stale (the deployment left `deploying`)
    /// or a duplicate delivery of a job that is already running. Any failure
    /// while running becomes a failed outcome.
    pub async fn execute(&self, job: &ExecutionJob) -> Option<ExecutionOutcome> {
        let id = job.deployment_id.as_str();

        let deployment = match self.stores.deployments.get(id).await {
            Ok(Some(deployment)) => deployment,
            Ok(None) => {
                warn!(deployment_id = id, "Execution job for unknown deployment");
                return None;
            }
            Err(e) => {
                error!(deployment_id = id, "Failed to load deployment: {}", e);
                return Some(ExecutionOutcome::failed(id, &e));
            }
        };

        if deployment.status != DeploymentStatus::Deploying {
            info!(
                deployment_id = id,
                status = %deployment.status,
                "Skipping execution job, deployment is no longer deploying"
            );
            return None;
        }

        let guard = self.runs.register(id)?;

        info!(deployment_id = id, name = %deployment.name, "Execution started");
        let started = Instant::now();

        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_log(
            self.stores.deployments.clone(),
            id.to_string(),
            rx,
        ));
        let log = LogSink { tx };

        let mut result = ExecutionResult::new(ExecutionMode::Local);
        let run = self
            .run_phases(&deployment, job, &guard, &log, &mut result)
            .await;

        drop(log);
        if let Err(e) = writer.await {
            warn!(deployment_id = id, "Log writer ended abnormally: {}", e);
        }

        let duration_secs = started.elapsed().as_secs();
        let (success, final_log) = match run {
            Ok(()) => {
                info!(deployment_id = id, duration_secs, "Execution succeeded");
                (true, journal::line("deployment finished successfully"))
            }
            Err(e) => {
                warn!(deployment_id = id, duration_secs, "Execution failed: {}", e);
                result.error_kind = Some(FailureKind::from(&e));
                (false, journal::line(&format!("deployment failed: {}", e)))
            }
        };

        Some(ExecutionOutcome {
            deployment_id: id.to_string(),
            success,
            duration_secs,
            final_log,
            result,
        })
    }

    async fn run_phases(
        &self,
        deployment: &Deployment,
        job: &ExecutionJob,
        guard: &RunGuard,
        log: &LogSink,
        result: &mut ExecutionResult,
    ) -> Result<(), OrchestratorError> {
        // preparing
        log.stage(
            Stage::Preparing,
            &format!(
                "deploying {} version {} to {}",
                deployment.name,
                deployment.version.as_deref().unwrap_or("latest"),
                deployment.environment
            ),
        );
        let project = self.stores.projects.require(&deployment.project_id).await?;
        let host = self.resolve_host(deployment, &project).await?;
        let env = script_env(deployment, &project);
        let workspace = self.workspaces.subdir(&project.id);
        workspace.create().await?;

        match &host {
            Some(host) if !host.is_local() => log.note(&format!(
                "target host {} ({}:{})",
                host.name, host.address, host.port
            )),
            _ => log.note("target is the local host"),
        }

        // building
        ensure_running(guard)?;
        let build_script = non_empty(project.build_script.as_deref());
        match build_script {
            _ if job.deploy_only => log.stage(Stage::Building, "build skipped for rollback"),
            None => log.stage(Stage::Building, "no build script, skipped"),
            Some(script) => {
                log.stage(Stage::Building, "running build script");
                let mut options = self.options(
                    guard,
                    log,
                    Duration::from_secs(self.settings.build_timeout_secs),
                    &env,
                );
                options.cwd = Some(workspace.path().to_path_buf());
                let output = self.runner.run(script, options).await?;
                result.build_output = Some(journal::tail(
                    &output.combined(),
                    self.settings.max_output_bytes,
                ));
                result.exit_code = output.exit_code();
                output.check("build script")?;
            }
        }

        // deploying
        ensure_running(guard)?;
        let deploy_script = if deployment.is_rollback() {
            non_empty(project.rollback_script.as_deref())
                .or_else(|| non_empty(Some(project.deploy_script.as_str())))
        } else {
            non_empty(Some(project.deploy_script.as_str()))
        };
        match (deploy_script, &host) {
            (None, _) => log.stage(Stage::Deploying, "no deploy script, skipped"),
            (Some(script), Some(host)) if !host.is_local() => {
                result.mode = ExecutionMode::Remote;
                log.stage(
                    Stage::Deploying,
                    &format!("connecting to {}", host.destination()),
                );
                let connect_timeout = Duration::from_secs(self.settings.connect_timeout_secs);
                let session = match RemoteSession::connect(host, connect_timeout).await {
                    Ok(session) => {
                        self.mark_host(&host.id, HostStatus::Online).await;
                        session
                    }
                    Err(e) => {
                        self.mark_host(&host.id, HostStatus::Unreachable).await;
                        return Err(e);
                    }
                };
                log.note("running deploy script on remote host");

                let mut options = self.options(
                    guard,
                    log,
                    Duration::from_secs(self.settings.deploy_timeout_secs),
                    &env,
                );
                options.remote = Some(&session);
                let run = self.runner.run(script, options).await;
                session.close().await;

                if let Err(OrchestratorError::ConnectionError(_)) = &run {
                    self.mark_host(&host.id, HostStatus::Unreachable).await;
                }
                let output = run?;
                result.deploy_output = Some(journal::tail(
                    &output.combined(),
                    self.settings.max_output_bytes,
                ));
                result.exit_code = output.exit_code();
                output.check("deploy script")?;
            }
            (Some(script), _) => {
                log.stage(Stage::Deploying, "running deploy script");
                let mut options = self.options(
                    guard,
                    log,
                    Duration::from_secs(self.settings.deploy_timeout_secs),
                    &env,
                );
                options.cwd = Some(workspace.path().to_path_buf());
                let output = self.runner.run(script, options).await?;
                result.deploy_output = Some(journal::tail(
                    &output.combined(),
                    self.settings.max_output_bytes,
                ));
                result.exit_code = output.exit_code();
                output.check("deploy script")?;
            }
        }

        // verifying
        ensure_running(guard)?;
        match non_empty(project.health_check_url.as_deref()) {
            None => log.stage(Stage::Verifying, "no health check configured, skipped"),
            Some(url) => {
                log.stage(Stage::Verifying, &format!("GET {}", url));
                let verify_output = self.health_check(url).await?;
                log.note(&verify_output);
                result.verify_output = Some(verify_output);
            }
        }

        Ok(())
    }

    fn options<'a>(
        &self,
        guard: &RunGuard,
        log: &LogSink,
        timeout: Duration,
        env: &[(String, String)],
    ) -> RunOptions<'a> {
        let mut options = RunOptions::new(timeout);
        options.env = env.to_vec();
        options.cancel = Some(guard.cancel_signal());
        options.output = Some(log.tx.clone());
        options
    }

    async fn resolve_host(
        &self,
        deployment: &Deployment,
        project: &Project,
    ) -> Result<Option<Host>, OrchestratorError> {
        match deployment.host_id.as_ref().or(project.host_id.as_ref()) {
            Some(host_id) => Ok(Some(self.stores.hosts.require(host_id).await?)),
            None => Ok(None),
        }
    }

    async fn mark_host(&self, host_id: &str, status: HostStatus) {
        if let Err(e) = self.stores.hosts.update(host_id, HostPatch::now(status)).await {
            warn!(host_id, "Failed to update host status: {}", e);
        }
    }

    async fn health_check(&self, url: &str) -> Result<String, OrchestratorError> {
        let response = self
            .http
            .get(url)
            .timeout(Duration::from_secs(self.settings.verify_timeout_secs))
            .send()
            .await
            .map_err(|e| OrchestratorError::ExecutionError(format!("health check failed: {}", e)))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let summary = format!(
            "health check returned {}{}",
            status,
            if body.trim().is_empty() {
                String::new()
            } else {
                format!(": {}", journal::tail(body.trim(), 512))
            }
        );

        if status.is_success() {
            Ok(summary)
        } else {
            Err(OrchestratorError::ExecutionError(summary))
        }
    }
}

/// Environment exported to build and deploy scripts
pub fn script_env(deployment: &Deployment, project: &Project) -> Vec<(String, String)> {
    vec![
        ("DEPLOY_ID".to_string(), deployment.id.clone()),
        ("DEPLOY_NAME".to_string(), deployment.name.clone()),
        (
            "DEPLOY_ENV".to_string(),
            deployment.environment.as_str().to_string(),
        ),
        (
            "DEPLOY_VERSION".to_string(),
            deployment.version.clone().unwrap_or_default(),
        ),
        (
            "DEPLOY_BUILD_NUMBER".to_string(),
            deployment
                .build_number
                .map(|n| n.to_string())
                .unwrap_or_default(),
        ),
        ("DEPLOY_PROJECT".to_string(), project.name.clone()),
        ("DEPLOY_REPO".to_string(), project.repository.clone()),
        ("DEPLOY_BRANCH".to_string(), project.branch.clone()),
        (
            "DEPLOY_ROLLBACK_OF".to_string(),
            deployment.rollback_of.clone().unwrap_or_default(),
        ),
    ]
}

fn non_empty(script: Option<&str>) -> Option<&str> {
    script.filter(|s| !s.trim().is_empty())
}

fn ensure_running(guard: &RunGuard) -> Result<(), OrchestratorError> {
    if guard.is_cancelled() {
        Err(OrchestratorError::Cancelled(
            "deployment was stopped".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Single writer of a deployment's log while it runs.
///
/// Lines queued while an append is in flight go out together in the next one.
async fn write_log(
    deployments: Arc<dyn Repository<Deployment>>,
    deployment_id: String,
    mut rx: mpsc::UnboundedReceiver<OutputLine>,
) {
    while let Some(first) = rx.recv().await {
        let mut chunk = journal::line(&first.text);
        while let Ok(next) = rx.try_recv() {
            chunk.push_str(&journal::line(&next.text));
        }

        let patch =
            DeploymentPatch::append(chunk).expect_status(&[DeploymentStatus::Deploying]);
        match deployments.update(&deployment_id, patch).await {
            Ok(_) => {}
            Err(OrchestratorError::IllegalTransition { status, .. }) => {
                debug!(
                    deployment_id = %deployment_id,
                    %status,
                    "Deployment left deploying, dropping output"
                );
            }
            Err(e) => warn!(deployment_id = %deployment_id, "Failed to append log: {}", e),
        }
    }
}
