//! Utility functions

use std::time::Duration;

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::storage::layout::StorageLayout;

/// Version information for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub git_hash: String,
    pub build_time: String,
}

/// Get version information
pub fn version_info() -> VersionInfo {
    VersionInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_hash: option_env!("GIT_HASH").unwrap_or("unknown").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
    }
}

/// Cooldown options for exponential backoff
#[derive(Debug, Clone)]
pub struct CooldownOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for CooldownOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
        }
    }
}

/// Calculate exponential backoff delay
pub fn calc_exp_backoff(options: &CooldownOptions, attempt: u32) -> Duration {
    let delay_secs = options.base_delay.as_secs_f64() * options.multiplier.powi(attempt as i32);
    let capped_delay = delay_secs.min(options.max_delay.as_secs_f64());
    Duration::from_secs_f64(capped_delay)
}

/// Generate a random UUID v4
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Tools the executor shells out to, with whether a missing one is fatal
const REQUIRED_TOOLS: &[(&str, bool)] = &[("sh", true), ("ssh", true), ("sshpass", false)];

async fn tool_available(tool: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {}", tool))
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Print a short environment check and return whether every required tool is present
pub async fn run_diagnostic(layout: &StorageLayout) -> bool {
    let version = version_info();
    println!(
        "{} {} ({}, built {})",
        "deployd".bold(),
        version.version,
        version.git_hash,
        version.build_time
    );

    let mut healthy = true;
    for (tool, required) in REQUIRED_TOOLS {
        if tool_available(tool).await {
            println!("  {} {}", "ok".green(), tool);
        } else if *required {
            healthy = false;
            println!("  {} {} not found", "missing".red(), tool);
        } else {
            println!(
                "  {} {} not found (password authenticated hosts unavailable)",
                "warn".yellow(),
                tool
            );
        }
    }

    let base_dir = layout.base_dir.display();
    let settings_file = layout.settings_file();
    if settings_file.exists().await {
        println!("  {} settings at {}", "ok".green(), settings_file.path().display());
    } else {
        println!("  {} no settings under {}, defaults apply", "warn".yellow(), base_dir);
    }

    healthy
}
