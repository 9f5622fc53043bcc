//! RollbackManager: reapply the snapshot images of an attempt

use std::collections::BTreeSet;

use tracing::{error, info, warn};

use crate::deploy::advance;
use crate::deploy::cluster::Cluster;
use crate::errors::ControllerError;
use crate::models::attempt::{AttemptEvent, DeploymentAttempt, Phase, RollbackReport};
use crate::storage::attempts::AttemptStore;

pub struct RollbackManager {
    cluster: Cluster,
    store: AttemptStore,
}

impl RollbackManager {
    pub fn new(cluster: Cluster, store: AttemptStore) -> Self {
        Self { cluster, store }
    }

    /// Restore every service to the image recorded before submission.
    ///
    /// `event` is `StartRollback` after a detected failure or
    /// `RollbackRequested` for an operator rollback. Leaves the attempt in
    /// `RolledBack` or `RollbackUnavailable`. Every service is attempted even
    /// when an earlier one fails, and reapplying an image a service already
    /// runs is a no-op on the orchestrator side.
    pub async fn roll_back(
        &self,
        attempt: &mut DeploymentAttempt,
        event: AttemptEvent,
    ) -> Result<Phase, ControllerError> {
        if !matches!(
            event,
            AttemptEvent::StartRollback | AttemptEvent::RollbackRequested
        ) {
            return Err(ControllerError::InvalidTransition(format!(
                "{:?} does not start a rollback",
                event
            )));
        }
        advance(&self.store, attempt, event).await?;

        let mut report = RollbackReport::default();
        let stack = attempt.stack.clone();

        for service in targets(attempt) {
            let image = match attempt.snapshot.get(&service) {
                Some(image) if !image.trim().is_empty() => image.clone(),
                _ => {
                    warn!("No snapshot image for {}/{}", stack, service);
                    report.missing_snapshot.push(service);
                    continue;
                }
            };

            match self.cluster.update_image(&stack, &service, &image).await {
                Ok(()) => {
                    info!("Restored {}/{} to {}", stack, service, image);
                    report.restored.insert(service, image);
                }
                Err(e) => {
                    error!("Failed to restore {}/{} to {}: {}", stack, service, image, e);
                    report.failed.insert(service, e.to_string());
                }
            }
        }

        if report.restored.is_empty() && report.missing_snapshot.is_empty() && report.failed.is_empty()
        {
            // nothing was ever snapshotted, there is no prior state to return to
            report.missing_snapshot.push("*".to_string());
        }

        let unavailable = report.unavailable();
        for (service, reason) in &report.failed {
            attempt.note(format!("reapplying '{}' failed: {}", service, reason));
        }
        attempt.rollback = Some(report);

        if unavailable.is_empty() {
            info!("Stack '{}' rolled back (attempt {})", stack, attempt.id);
            advance(&self.store, attempt, AttemptEvent::RolledBack).await
        } else {
            error!(
                "Stack '{}' could not be fully rolled back, operator action required: {}",
                stack,
                unavailable.join(", ")
            );
            advance(
                &self.store,
                attempt,
                AttemptEvent::RollbackUnavailable(unavailable),
            )
            .await
        }
    }
}

/// Spec services in document order, then any other snapshotted service
fn targets(attempt: &DeploymentAttempt) -> Vec<String> {
    let mut seen = BTreeSet::new();
    attempt
        .services
        .iter()
        .chain(attempt.snapshot.keys())
        .filter(|service| seen.insert(service.as_str()))
        .cloned()
        .collect()
}
