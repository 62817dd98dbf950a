//! Pre-authenticated caller identity and permissions

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::errors::OrchestratorError;

/// Identifier used for commands issued by the orchestrator itself
pub const SYSTEM_CALLER_ID: &str = "system";

/// A permission on deployment lifecycle commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Create,
    Approve,
    Execute,
    Rollback,
    /// Implies every other permission and ownership of every deployment
    Admin,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "deployments:read",
            Permission::Create => "deployments:create",
            Permission::Approve => "deployments:approve",
            Permission::Execute => "deployments:execute",
            Permission::Rollback => "deployments:rollback",
            Permission::Admin => "admin",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "deployments:read" => Ok(Permission::Read),
            "deployments:create" => Ok(Permission::Create),
            "deployments:approve" => Ok(Permission::Approve),
            "deployments:execute" => Ok(Permission::Execute),
            "deployments:rollback" => Ok(Permission::Rollback),
            "admin" => Ok(Permission::Admin),
            _ => Err(OrchestratorError::ValidationError(format!(
                "Invalid permission: {}",
                s
            ))),
        }
    }
}

/// The identity a lifecycle command runs as.
///
/// Authentication happens upstream; the orchestrator trusts this value.
#[derive(Debug, Clone)]
pub struct Caller {
    pub id: String,
    pub name: String,
    permissions: HashSet<Permission>,
}

impl Caller {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        permissions: impl IntoIterator<Item = Permission>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            permissions: permissions.into_iter().collect(),
        }
    }

    /// The orchestrator acting on its own behalf (scheduler, recovery)
    pub fn system() -> Self {
        Self::new(SYSTEM_CALLER_ID, "deployd", [Permission::Admin])
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.contains(&Permission::Admin)
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.is_admin() || self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), OrchestratorError> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(OrchestratorError::AuthorizationError(format!(
                "{} lacks permission {}",
                self.id, permission
            )))
        }
    }

    /// Require that the caller owns the resource, or is an admin
    pub fn require_owner(&self, owner_id: &str) -> Result<(), OrchestratorError> {
        if self.is_admin() || self.id == owner_id {
            Ok(())
        } else {
            Err(OrchestratorError::AuthorizationError(format!(
                "{} does not own this deployment",
                self.id
            )))
        }
    }
}
