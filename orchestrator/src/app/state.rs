//! Application state management

use std::sync::Arc;

use tracing::{info, warn};

use crate::app::options::AppOptions;
use crate::authz::directory::StaticDirectory;
use crate::deploy::controller::DeploymentController;
use crate::deploy::executor::ExecutionCoordinator;
use crate::deploy::queue::{job_queue, JobReceiver};
use crate::deploy::rollback::RollbackCoordinator;
use crate::deploy::runs::RunRegistry;
use crate::deploy::stage::StageExtractor;
use crate::errors::OrchestratorError;
use crate::notify::webhook::WebhookNotifier;
use crate::notify::{LogNotifier, NotificationSink};
use crate::storage::repository::Stores;

/// Main application state
pub struct AppState {
    /// Record stores
    pub stores: Stores,

    /// Lifecycle commands and queries
    pub controller: Arc<DeploymentController>,

    /// Runs build/deploy/verify for queued jobs
    pub executor: Arc<ExecutionCoordinator>,

    /// Rollback entry point
    pub rollbacks: Arc<RollbackCoordinator>,
}

impl AppState {
    /// Initialize application state.
    ///
    /// Returns the receiving end of the execution queue for the dispatcher.
    pub async fn init(options: &AppOptions) -> Result<(Self, JobReceiver), OrchestratorError> {
        info!("Initializing application state...");

        let layout = &options.storage.layout;
        let stores = if options.storage.persist {
            layout.setup().await?;
            Stores::open(layout).await?
        } else {
            warn!("Persistence disabled, records are kept in memory only");
            layout.workspaces_dir().create().await?;
            Stores::in_memory()
        };

        let notifier: Arc<dyn NotificationSink> = match &options.webhook_url {
            Some(url) => Arc::new(WebhookNotifier::new(url)?),
            None => Arc::new(LogNotifier),
        };
        let directory = Arc::new(StaticDirectory::from_settings(&options.admins));

        let (jobs, receiver) = job_queue();
        let runs = Arc::new(RunRegistry::new());

        let mut controller = DeploymentController::new(
            stores.clone(),
            directory,
            notifier,
            jobs,
            runs.clone(),
            options.approval_policy.clone(),
        );
        if !options.stage_rules.is_empty() {
            let stages = StageExtractor::with_rules(
                options
                    .stage_rules
                    .iter()
                    .map(|rule| (rule.pattern.as_str(), rule.label.clone())),
            )?;
            info!("Using {} custom stage rule(s)", options.stage_rules.len());
            controller = controller.with_stage_extractor(stages);
        }
        let controller = Arc::new(controller);
        let executor = Arc::new(ExecutionCoordinator::new(
            stores.clone(),
            runs,
            layout.workspaces_dir(),
            options.execution.clone(),
        ));
        let rollbacks = Arc::new(RollbackCoordinator::new(
            controller.clone(),
            executor.clone(),
        ));

        let state = Self {
            stores,
            controller,
            executor,
            rollbacks,
        };
        Ok((state, receiver))
    }
}
