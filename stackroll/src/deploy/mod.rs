//! Rollout pipeline: deployer, convergence monitor, health verifier,
//! rollback manager, and the controller tying them together

pub mod cluster;
pub mod controller;
pub mod convergence;
pub mod deployer;
pub mod health;
pub mod rollback;

use tracing::error;

use crate::errors::ControllerError;
use crate::models::attempt::{AttemptEvent, DeploymentAttempt, Phase};
use crate::storage::attempts::AttemptStore;

/// Apply `event` and persist the attempt
pub(crate) async fn advance(
    store: &AttemptStore,
    attempt: &mut DeploymentAttempt,
    event: AttemptEvent,
) -> Result<Phase, ControllerError> {
    let phase = attempt.process(event)?;
    persist(store, attempt).await;
    Ok(phase)
}

/// Persist the attempt, logging on failure.
///
/// After submission the attempt must still reach a terminal phase even when
/// the journal is unwritable, so this does not fail.
pub(crate) async fn persist(store: &AttemptStore, attempt: &DeploymentAttempt) {
    if let Err(e) = store.save(attempt).await {
        error!(
            "Failed to persist attempt {} ({}): {}",
            attempt.id,
            attempt.phase(),
            e
        );
    }
}
