//! Error types for the deployment orchestrator

use thiserror::Error;

use crate::models::deployment::DeploymentStatus;

/// Main error type for the deployment orchestrator
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authorization error: {0}")]
    AuthorizationError(String),

    #[error("Illegal transition from {status}: {message}")]
    IllegalTransition {
        status: DeploymentStatus,
        message: String,
    },

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// Stable machine-readable kind, used in API error bodies
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::ValidationError(_) => "validation",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::AuthorizationError(_) => "authorization",
            OrchestratorError::IllegalTransition { .. } => "illegal_transition",
            OrchestratorError::ConnectionError(_) => "connection",
            OrchestratorError::ExecutionError(_) => "execution",
            OrchestratorError::Timeout(_) => "timeout",
            OrchestratorError::Cancelled(_) => "cancelled",
            OrchestratorError::IoError(_)
            | OrchestratorError::JsonError(_)
            | OrchestratorError::StorageError(_) => "storage",
            OrchestratorError::HttpError(_) => "http",
            OrchestratorError::ConfigError(_) => "config",
            OrchestratorError::ServerError(_)
            | OrchestratorError::ShutdownError(_)
            | OrchestratorError::Internal(_) => "internal",
        }
    }

    /// Shorthand for an illegal transition error
    pub fn illegal(status: DeploymentStatus, message: impl Into<String>) -> Self {
        OrchestratorError::IllegalTransition {
            status,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}
