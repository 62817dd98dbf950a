//! Application configuration options

use std::time::Duration;

use crate::deploy::controller::ApprovalPolicy;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::{ApproverSettings, ExecutionSettings, Settings, StageRuleSettings};
use crate::workers::{dispatcher, host_probe, scheduler};

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage configuration
    pub storage: StorageOptions,

    /// Enable the HTTP API
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Script execution settings
    pub execution: ExecutionSettings,

    /// Which deployments go through the approval gate
    pub approval_policy: ApprovalPolicy,

    /// Admin approver pool
    pub admins: Vec<ApproverSettings>,

    /// Approval request webhook; log-only notifications when `None`
    pub webhook_url: Option<String>,

    /// Dispatcher worker options
    pub dispatcher: dispatcher::Options,

    /// Scheduler worker options
    pub scheduler: scheduler::Options,

    /// Enable the host probe worker
    pub enable_host_probe: bool,

    /// Host probe worker options
    pub host_probe: host_probe::Options,

    /// Custom stage rules
    pub stage_rules: Vec<StageRuleSettings>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageOptions::default(),
            enable_socket_server: true,
            server: ServerOptions::default(),
            execution: ExecutionSettings::default(),
            approval_policy: ApprovalPolicy::default(),
            admins: Vec::new(),
            webhook_url: None,
            dispatcher: dispatcher::Options::default(),
            scheduler: scheduler::Options::default(),
            enable_host_probe: true,
            host_probe: host_probe::Options::default(),
            stage_rules: Vec::new(),
        }
    }
}

impl AppOptions {
    /// Options for a settings file found under `layout`
    pub fn from_settings(settings: &Settings, layout: StorageLayout) -> Self {
        Self {
            lifecycle: LifecycleOptions {
                max_shutdown_delay: Duration::from_secs(settings.max_shutdown_delay_secs),
            },
            storage: StorageOptions {
                layout,
                persist: settings.persist,
            },
            enable_socket_server: true,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            execution: settings.execution.clone(),
            approval_policy: ApprovalPolicy {
                required_environments: settings.approvals.required_environments.clone(),
            },
            admins: settings.approvals.admins.clone(),
            webhook_url: settings
                .notifications
                .webhook_url
                .clone()
                .filter(|url| !url.trim().is_empty()),
            dispatcher: dispatcher::Options::default(),
            scheduler: scheduler::Options {
                interval: Duration::from_secs(settings.scheduler_interval_secs.max(1)),
            },
            enable_host_probe: settings.host_probe.enabled,
            host_probe: host_probe::Options {
                interval: Duration::from_secs(settings.host_probe.interval_secs.max(1)),
                timeout: Duration::from_secs(settings.host_probe.timeout_secs.max(1)),
            },
            stage_rules: settings.stage_rules.clone(),
        }
    }
}

/// Lifecycle options
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
        }
    }
}

/// Storage configuration options
#[derive(Debug, Clone)]
pub struct StorageOptions {
    /// Storage layout paths
    pub layout: StorageLayout,

    /// Snapshot records to disk; memory only otherwise
    pub persist: bool,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            persist: true,
        }
    }
}

/// HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8085,
        }
    }
}
