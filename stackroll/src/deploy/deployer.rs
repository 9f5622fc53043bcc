//! Deployer: snapshot current images, then submit the new stack

use futures::future::join_all;
use tracing::{error, info, warn};

use crate::deploy::cluster::Cluster;
use crate::deploy::{advance, persist};
use crate::errors::ControllerError;
use crate::models::attempt::{AttemptEvent, DeploymentAttempt, Phase};
use crate::models::spec::StackSpec;
use crate::orchestrator::OrchestratorError;
use crate::storage::attempts::AttemptStore;

pub struct Deployer {
    cluster: Cluster,
    store: AttemptStore,
}

impl Deployer {
    pub fn new(cluster: Cluster, store: AttemptStore) -> Self {
        Self { cluster, store }
    }

    /// Snapshot and submit.
    ///
    /// Expects the attempt in `Validating` with the stack lock held by the
    /// caller. Leaves it in `Submitted` or `SubmissionError`. The snapshot is
    /// on disk before the orchestrator sees the new spec; if it cannot be
    /// written nothing is submitted. A submission that timed out may still
    /// have been applied and counts as submitted, so convergence and rollback
    /// still run.
    pub async fn deploy(
        &self,
        attempt: &mut DeploymentAttempt,
        spec: &StackSpec,
    ) -> Result<Phase, ControllerError> {
        attempt.spec_digest = Some(spec.digest().to_string());
        attempt.services = spec.service_names();

        if let Err(e) = self.snapshot(attempt, spec).await {
            return advance(
                &self.store,
                attempt,
                AttemptEvent::SubmissionFailed(format!(
                    "unable to snapshot current images: {}",
                    e
                )),
            )
            .await;
        }

        if let Err(e) = self.store.save(attempt).await {
            error!("Snapshot for attempt {} could not be persisted: {}", attempt.id, e);
            attempt.process(AttemptEvent::SubmissionFailed(format!(
                "snapshot could not be persisted, spec not submitted: {}",
                e
            )))?;
            persist(&self.store, attempt).await;
            return Ok(attempt.phase());
        }

        match self.cluster.submit(spec).await {
            Ok(()) => {
                info!(
                    "Stack '{}' submitted (attempt {}, {} service(s))",
                    spec.name(),
                    attempt.id,
                    spec.services().len()
                );
                advance(&self.store, attempt, AttemptEvent::Submitted).await
            }
            Err(OrchestratorError::Rejected(reason)) => {
                warn!("Orchestrator rejected stack '{}': {}", spec.name(), reason);
                advance(
                    &self.store,
                    attempt,
                    AttemptEvent::SubmissionFailed(format!(
                        "orchestrator rejected the stack: {}",
                        reason
                    )),
                )
                .await
            }
            Err(OrchestratorError::TimedOut(reason)) => {
                warn!(
                    "Submission of stack '{}' timed out, treating it as applied: {}",
                    spec.name(),
                    reason
                );
                attempt.note(format!(
                    "submission outcome unknown ({}); watching the stack as if it was applied",
                    reason
                ));
                advance(&self.store, attempt, AttemptEvent::Submitted).await
            }
            Err(e) => {
                warn!("Submitting stack '{}' failed: {}", spec.name(), e);
                advance(
                    &self.store,
                    attempt,
                    AttemptEvent::SubmissionFailed(format!("submission failed: {}", e)),
                )
                .await
            }
        }
    }

    /// Record the image every spec service runs right now
    async fn snapshot(
        &self,
        attempt: &mut DeploymentAttempt,
        spec: &StackSpec,
    ) -> Result<(), OrchestratorError> {
        let stack = spec.name();
        let images = join_all(
            spec.services()
                .iter()
                .map(|service| self.cluster.service_image(stack, &service.name)),
        )
        .await;

        for (service, image) in spec.services().iter().zip(images) {
            match image? {
                Some(image) if !image.trim().is_empty() => {
                    info!("Snapshot {}/{} -> {}", stack, service.name, image);
                    attempt.snapshot.insert(service.name.clone(), image);
                }
                _ => {
                    warn!("{}/{} is not running yet; it has no rollback target", stack, service.name);
                    attempt.note(format!(
                        "service '{}' has no current image; it cannot be rolled back",
                        service.name
                    ));
                }
            }
        }

        Ok(())
    }
}
