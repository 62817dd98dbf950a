//! Settings file management

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::models::deployment::Environment;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit logs as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Also write logs to daily files under the logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,

    /// Persist records to JSON snapshots under the data directory
    #[serde(default = "default_true")]
    pub persist: bool,

    /// Script execution configuration
    #[serde(default)]
    pub execution: ExecutionSettings,

    /// Approval policy
    #[serde(default)]
    pub approvals: ApprovalSettings,

    /// Notification delivery
    #[serde(default)]
    pub notifications: NotificationSettings,

    /// Scheduler polling interval in seconds
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,

    /// Host connectivity probing
    #[serde(default)]
    pub host_probe: HostProbeSettings,

    /// Maximum delay for graceful shutdown in seconds
    #[serde(default = "default_shutdown_delay")]
    pub max_shutdown_delay_secs: u64,

    /// Custom stage rules for status polling; the built-in rules when empty
    #[serde(default)]
    pub stage_rules: Vec<StageRuleSettings>,
}

fn default_true() -> bool {
    true
}

fn default_scheduler_interval() -> u64 {
    15
}

fn default_shutdown_delay() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            log_to_file: false,
            server: ServerSettings::default(),
            persist: true,
            execution: ExecutionSettings::default(),
            approvals: ApprovalSettings::default(),
            notifications: NotificationSettings::default(),
            scheduler_interval_secs: default_scheduler_interval(),
            host_probe: HostProbeSettings::default(),
            max_shutdown_delay_secs: default_shutdown_delay(),
            stage_rules: Vec::new(),
        }
    }
}

/// A `(pattern, label)` stage rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRuleSettings {
    pub pattern: String,
    pub label: String,
}

/// Read the settings file, falling back to defaults when it does not exist
pub async fn load_settings(file: &File) -> Result<Settings, OrchestratorError> {
    if !file.exists().await {
        return Ok(Settings::default());
    }
    file.read_json::<Settings>().await
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8085
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Script execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Shell used for local scripts (`<shell> -c <script>`)
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,

    #[serde(default = "default_deploy_timeout")]
    pub deploy_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,

    /// Script output kept in the execution result (tail)
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_build_timeout() -> u64 {
    1800
}

fn default_deploy_timeout() -> u64 {
    1800
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_verify_timeout() -> u64 {
    30
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            build_timeout_secs: default_build_timeout(),
            deploy_timeout_secs: default_deploy_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            verify_timeout_secs: default_verify_timeout(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// An entry of the admin approver pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproverSettings {
    pub id: String,

    #[serde(default)]
    pub name: String,
}

/// Approval policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSettings {
    /// Environments that always require approval
    #[serde(default = "default_required_environments")]
    pub required_environments: Vec<Environment>,

    /// Admin pool used when a deployment names no approvers
    #[serde(default)]
    pub admins: Vec<ApproverSettings>,
}

fn default_required_environments() -> Vec<Environment> {
    vec![Environment::Prod]
}

impl Default for ApprovalSettings {
    fn default() -> Self {
        Self {
            required_environments: default_required_environments(),
            admins: Vec::new(),
        }
    }
}

/// Notification settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Webhook receiving approval requests; notifications are only logged when absent
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// Host probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostProbeSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

fn default_probe_interval() -> u64 {
    120
}

fn default_probe_timeout() -> u64 {
    5
}

impl Default for HostProbeSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_probe_interval(),
            timeout_secs: default_probe_timeout(),
        }
    }
}
