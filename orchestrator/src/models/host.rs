//! Remote host models

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};

use crate::errors::OrchestratorError;
use crate::storage::repository::Record;

/// Addresses that resolve to the orchestrator itself
const LOCAL_ADDRESSES: &[&str] = &["", "localhost", "127.0.0.1", "::1"];

/// Credential material owned by a host.
///
/// Only ever borrowed for the lifetime of one remote session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Password authentication (requires `sshpass` on the orchestrator)
    Password {
        #[serde(serialize_with = "expose")]
        password: SecretString,
    },

    /// Private key file already present on the orchestrator
    PrivateKeyPath { path: PathBuf },

    /// Inline PEM private key
    PrivateKey {
        #[serde(serialize_with = "expose")]
        key: SecretString,
    },

    /// Whatever the local ssh agent / default identities provide
    #[default]
    Agent,
}

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Cached connectivity status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[default]
    Unknown,
    Online,
    Unreachable,
}

/// Remote execution target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default)]
    pub status: HostStatus,

    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

fn default_port() -> u16 {
    22
}

fn default_username() -> String {
    "root".to_string()
}

impl Host {
    /// Whether commands for this host run on the orchestrator itself
    pub fn is_local(&self) -> bool {
        LOCAL_ADDRESSES.contains(&self.address.trim())
    }

    /// Reject addresses and user names ssh would parse as something else
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        for (field, value) in [("address", &self.address), ("username", &self.username)] {
            let value = value.trim();
            if value.is_empty() && field == "username" {
                return Err(OrchestratorError::ValidationError(format!(
                    "host {}: {} must not be empty",
                    self.id, field
                )));
            }
            if value.starts_with('-') || value.chars().any(|c| c.is_whitespace() || c == '@') {
                return Err(OrchestratorError::ValidationError(format!(
                    "host {}: invalid {} {:?}",
                    self.id, field, value
                )));
            }
        }
        Ok(())
    }

    /// `user@address` destination for ssh
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }
}

/// Connectivity cache refresh
#[derive(Debug, Clone)]
pub struct HostPatch {
    pub status: HostStatus,
    pub checked_at: DateTime<Utc>,
}

impl HostPatch {
    pub fn now(status: HostStatus) -> Self {
        Self {
            status,
            checked_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    pub status: Option<HostStatus>,
}

impl Record for Host {
    type Patch = HostPatch;
    type Filter = HostFilter;

    const KIND: &'static str = "host";

    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, patch: HostPatch) -> Result<(), OrchestratorError> {
        self.status = patch.status;
        self.last_checked_at = Some(patch.checked_at);
        Ok(())
    }

    fn matches(&self, filter: &HostFilter) -> bool {
        filter.status.is_none_or(|s| s == self.status)
    }
}
