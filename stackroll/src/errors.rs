//! Error types for the rollout controller

use thiserror::Error;

/// Main error type for the controller.
///
/// Attempt-level outcomes (convergence timeout, failed health check, rollback
/// unavailable) are phases of a `DeploymentAttempt`, not errors. This type
/// covers everything that prevents the controller from driving an attempt.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Stack '{stack}' already has an attempt in progress (held by {holder})")]
    AttemptInProgress { stack: String, holder: String },

    #[error("Invalid stack name '{0}'")]
    InvalidStackName(String),

    #[error("No deployment attempt recorded for stack '{0}'")]
    NoAttempt(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Rollback not possible: {0}")]
    RollbackRefused(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Notification error: {0}")]
    NotifyError(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
