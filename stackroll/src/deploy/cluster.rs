//! Orchestrator access with query-layer retries

use std::sync::Arc;
use std::time::Duration;

use crate::models::service::ServiceState;
use crate::models::spec::StackSpec;
use crate::orchestrator::{Orchestrator, OrchestratorError};
use crate::retry::RetryPolicy;
use crate::schedule::Scheduler;

/// Orchestrator client plus the retry policy for transient faults.
///
/// Every call is retried while the orchestrator reports itself unavailable;
/// any other error is returned at once.
#[derive(Clone)]
pub struct Cluster {
    orchestrator: Arc<dyn Orchestrator>,
    scheduler: Arc<dyn Scheduler>,
    retry: RetryPolicy,
}

impl Cluster {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        scheduler: Arc<dyn Scheduler>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            orchestrator,
            scheduler,
            retry,
        }
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub fn shared_scheduler(&self) -> Arc<dyn Scheduler> {
        self.scheduler.clone()
    }

    pub async fn service_image(
        &self,
        stack: &str,
        service: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        self.retry
            .run(self.scheduler(), |_| {
                self.orchestrator.get_service_image(stack, service)
            })
            .await
    }

    pub async fn submit(&self, spec: &StackSpec) -> Result<(), OrchestratorError> {
        self.retry
            .run(self.scheduler(), |_| self.orchestrator.submit_stack(spec))
            .await
    }

    pub async fn service_state(
        &self,
        stack: &str,
        service: &str,
    ) -> Result<ServiceState, OrchestratorError> {
        self.retry
            .run(self.scheduler(), |_| {
                self.orchestrator.get_service_state(stack, service)
            })
            .await
    }

    /// Like `service_state`, but retries stop once `budget` has elapsed
    pub async fn service_state_within(
        &self,
        stack: &str,
        service: &str,
        budget: Duration,
    ) -> Result<ServiceState, OrchestratorError> {
        self.retry
            .within(budget)
            .run(self.scheduler(), |_| {
                self.orchestrator.get_service_state(stack, service)
            })
            .await
    }

    pub async fn update_image(
        &self,
        stack: &str,
        service: &str,
        image: &str,
    ) -> Result<(), OrchestratorError> {
        self.retry
            .run(self.scheduler(), |_| {
                self.orchestrator.update_service_image(stack, service, image)
            })
            .await
    }
}
