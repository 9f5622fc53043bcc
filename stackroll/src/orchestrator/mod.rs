//! Cluster orchestrator contract
//!
//! The controller only ever talks to the cluster through these four
//! operations. Implementations return typed records; nothing above this
//! layer parses tool output.

pub mod swarm;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::service::ServiceState;
use crate::models::spec::StackSpec;
use crate::retry::Transient;

/// Errors returned by an orchestrator client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Connectivity fault; the same request may succeed later
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    /// The command did not finish in time; whether it took effect is unknown
    #[error("orchestrator timed out: {0}")]
    TimedOut(String),

    /// The orchestrator refused the request
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Output could not be understood
    #[error("malformed orchestrator response: {0}")]
    Malformed(String),
}

impl Transient for OrchestratorError {
    /// A timed-out mutation may have been applied, so it is never repeated
    /// blindly
    fn is_transient(&self) -> bool {
        matches!(self, OrchestratorError::Unavailable(_))
    }
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Image the service currently runs, `None` when the service does not exist
    async fn get_service_image(
        &self,
        stack: &str,
        service: &str,
    ) -> Result<Option<String>, OrchestratorError>;

    /// Submit the whole stack as one operation
    async fn submit_stack(&self, spec: &StackSpec) -> Result<(), OrchestratorError>;

    /// Replica counts and task errors of one service
    async fn get_service_state(
        &self,
        stack: &str,
        service: &str,
    ) -> Result<ServiceState, OrchestratorError>;

    /// Point one service at a different image
    async fn update_service_image(
        &self,
        stack: &str,
        service: &str,
        image: &str,
    ) -> Result<(), OrchestratorError>;
}
