//! Caller identity from request headers.
//!
//! Authentication happens upstream; the proxy in front of the orchestrator
//! forwards the verified identity in `x-user-id`, `x-user-name` and
//! `x-user-permissions` (comma separated).

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tracing::debug;

use crate::authz::caller::{Caller, Permission};
use crate::errors::OrchestratorError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_NAME_HEADER: &str = "x-user-name";
pub const USER_PERMISSIONS_HEADER: &str = "x-user-permissions";

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse a comma separated permission list, skipping unknown entries
pub fn parse_permissions(raw: &str) -> Vec<Permission> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .filter_map(|p| match p.parse::<Permission>() {
            Ok(permission) => Some(permission),
            Err(_) => {
                debug!("Ignoring unknown permission '{}'", p);
                None
            }
        })
        .collect()
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = OrchestratorError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_ID_HEADER).ok_or_else(|| {
            OrchestratorError::AuthorizationError(format!("missing {} header", USER_ID_HEADER))
        })?;
        let name = header(parts, USER_NAME_HEADER).unwrap_or_else(|| id.clone());
        let permissions = header(parts, USER_PERMISSIONS_HEADER)
            .map(|raw| parse_permissions(&raw))
            .unwrap_or_default();

        Ok(Caller::new(id, name, permissions))
    }
}
