//! Controller: drives one attempt through the whole state machine
//!
//! deploy:   lock -> validate -> snapshot + submit -> converge -> health
//!           -> (rollback on failure) -> notify
//! rollback: lock -> reapply the snapshot of the newest attempt that
//!           touched the cluster -> notify
//! status:   read the latest attempt, optionally query live state

use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::deploy::cluster::Cluster;
use crate::deploy::convergence::{ConvergenceMonitor, ConvergenceOptions};
use crate::deploy::deployer::Deployer;
use crate::deploy::health::{HealthOptions, HealthProbe, HealthVerifier};
use crate::deploy::rollback::RollbackManager;
use crate::deploy::{advance, persist};
use crate::errors::ControllerError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::attempt::{AttemptEvent, DeploymentAttempt, Phase};
use crate::models::service::ServiceState;
use crate::models::spec::StackSpec;
use crate::notify::{notify_best_effort, Annotation, Notifier};
use crate::orchestrator::OrchestratorError;
use crate::schedule::AbortSignal;
use crate::spec::loader::{load_spec, load_spec_file, ValidationError, NAME_RE};
use crate::storage::attempts::AttemptStore;
use crate::storage::lock::{LockRecord, StackLock};

/// Controller options
#[derive(Debug, Clone, Default)]
pub struct ControllerOptions {
    pub convergence: ConvergenceOptions,
    pub health: HealthOptions,

    /// Extra tags attached to every annotation
    pub tags: Vec<String>,
}

/// What `status` reports for a stack
#[derive(Debug)]
pub struct StackStatus {
    pub attempt: DeploymentAttempt,

    /// Current lock holder, if an attempt is in flight
    pub lock: Option<LockRecord>,

    /// Live state per service, empty unless requested
    pub live: Vec<(String, Result<ServiceState, OrchestratorError>)>,
}

pub struct Controller {
    cluster: Cluster,
    store: AttemptStore,
    locks_dir: Dir,
    notifier: Arc<dyn Notifier>,
    deployer: Deployer,
    monitor: ConvergenceMonitor,
    verifier: HealthVerifier,
    rollback: RollbackManager,
    tags: Vec<String>,
}

impl Controller {
    pub fn new(
        cluster: Cluster,
        probe: Arc<dyn HealthProbe>,
        notifier: Arc<dyn Notifier>,
        store: AttemptStore,
        locks_dir: Dir,
        options: ControllerOptions,
    ) -> Self {
        Self {
            deployer: Deployer::new(cluster.clone(), store.clone()),
            monitor: ConvergenceMonitor::new(cluster.clone(), store.clone(), options.convergence),
            verifier: HealthVerifier::new(
                probe,
                cluster.shared_scheduler(),
                store.clone(),
                options.health,
            ),
            rollback: RollbackManager::new(cluster.clone(), store.clone()),
            cluster,
            store,
            locks_dir,
            notifier,
            tags: options.tags,
        }
    }

    /// Deploy the stack document at `file`
    pub async fn deploy_file(
        &self,
        stack: &str,
        file: &File,
        abort: &AbortSignal,
    ) -> Result<DeploymentAttempt, ControllerError> {
        check_stack_name(stack)?;
        let (attempt, _lock) = self.begin(stack).await?;
        let spec = load_spec_file(stack, file).await;
        self.run_deploy(attempt, spec, abort).await
    }

    /// Deploy a stack document held in memory
    pub async fn deploy_source(
        &self,
        stack: &str,
        source: &str,
        abort: &AbortSignal,
    ) -> Result<DeploymentAttempt, ControllerError> {
        check_stack_name(stack)?;
        let (attempt, _lock) = self.begin(stack).await?;
        let spec = load_spec(stack, source);
        self.run_deploy(attempt, spec, abort).await
    }

    /// Create the attempt under the stack lock and start validating
    async fn begin(&self, stack: &str) -> Result<(DeploymentAttempt, StackLock), ControllerError> {
        let mut attempt = DeploymentAttempt::new(stack);
        let lock = self.lock(stack, &attempt.id).await?;
        info!("Starting attempt {} for stack '{}'", attempt.id, stack);
        advance(&self.store, &mut attempt, AttemptEvent::Validate).await?;
        Ok((attempt, lock))
    }

    async fn run_deploy(
        &self,
        mut attempt: DeploymentAttempt,
        spec: Result<StackSpec, ValidationError>,
        abort: &AbortSignal,
    ) -> Result<DeploymentAttempt, ControllerError> {
        let spec = match spec {
            Ok(spec) => spec,
            Err(e) => {
                warn!("Stack '{}' rejected: {}", attempt.stack, e);
                advance(
                    &self.store,
                    &mut attempt,
                    AttemptEvent::ValidationFailed(e.to_string()),
                )
                .await?;
                return self.finish(attempt).await;
            }
        };

        if self.deployer.deploy(&mut attempt, &spec).await? == Phase::SubmissionError {
            return self.finish(attempt).await;
        }

        let mut phase = self.monitor.watch(&mut attempt, &spec, abort).await?;
        if phase == Phase::Converged {
            phase = self.verifier.verify(&mut attempt, abort).await?;
        }

        if matches!(phase, Phase::ConvergenceTimeout | Phase::HealthCheckFailed) {
            if abort.is_aborted() {
                attempt.note("abort requested after the failure was detected; rolling back first");
                persist(&self.store, &attempt).await;
            }
            self.rollback
                .roll_back(&mut attempt, AttemptEvent::StartRollback)
                .await?;
            if abort.is_aborted() {
                attempt.note(format!(
                    "abort was deferred until rollback finished in {}",
                    attempt.phase()
                ));
                persist(&self.store, &attempt).await;
            }
        }

        self.finish(attempt).await
    }

    /// Roll the stack back to the snapshot of the newest attempt that may
    /// have changed the cluster.
    ///
    /// Attempts rejected before submission are skipped, so a bad deploy after
    /// a good one still rolls back the good one. `force` breaks a lock left by
    /// an interrupted process.
    pub async fn rollback(
        &self,
        stack: &str,
        force: bool,
    ) -> Result<DeploymentAttempt, ControllerError> {
        check_stack_name(stack)?;
        let mut attempt = self.rollback_target(stack).await?;

        if force {
            if let Some(holder) = StackLock::holder(&self.locks_dir, stack).await? {
                warn!("Forcing rollback of '{}' despite lock held by {}", stack, holder);
                StackLock::break_lock(&self.locks_dir, stack).await?;
            }
        }

        let _lock = self.lock(stack, &attempt.id).await?;
        info!(
            "Rolling back stack '{}' to the snapshot of attempt {} ({})",
            stack,
            attempt.id,
            attempt.phase()
        );
        self.rollback
            .roll_back(&mut attempt, AttemptEvent::RollbackRequested)
            .await?;

        self.finish(attempt).await
    }

    /// Newest attempt with a snapshot worth reapplying
    async fn rollback_target(&self, stack: &str) -> Result<DeploymentAttempt, ControllerError> {
        let history = self.store.history(stack).await?;
        let (latest_id, latest_phase) = match history.last() {
            Some(latest) => (latest.id.clone(), latest.phase()),
            None => return Err(ControllerError::NoAttempt(stack.to_string())),
        };

        match history.into_iter().rev().find(|a| a.allows_manual_rollback()) {
            Some(attempt) => {
                if attempt.id != latest_id {
                    info!(
                        "Latest attempt {} of '{}' ended in {} without changing the cluster; using attempt {}",
                        latest_id, stack, latest_phase, attempt.id
                    );
                }
                Ok(attempt)
            }
            None => Err(ControllerError::RollbackRefused(format!(
                "no attempt of '{}' reached the cluster (latest {} ended in {})",
                stack, latest_id, latest_phase
            ))),
        }
    }

    /// Latest attempt for the stack, plus live service state when `live`
    pub async fn status(&self, stack: &str, live: bool) -> Result<StackStatus, ControllerError> {
        check_stack_name(stack)?;
        let attempt = self
            .store
            .latest(stack)
            .await?
            .ok_or_else(|| ControllerError::NoAttempt(stack.to_string()))?;
        let lock = StackLock::holder(&self.locks_dir, stack).await?;

        let live = if live {
            let states = join_all(
                attempt
                    .services
                    .iter()
                    .map(|service| self.cluster.service_state(stack, service)),
            )
            .await;
            attempt.services.iter().cloned().zip(states).collect()
        } else {
            Vec::new()
        };

        Ok(StackStatus {
            attempt,
            lock,
            live,
        })
    }

    /// Take the stack lock, reclaiming it when its holder already finished
    async fn lock(&self, stack: &str, attempt_id: &str) -> Result<StackLock, ControllerError> {
        let err = match StackLock::acquire(&self.locks_dir, stack, attempt_id).await {
            Ok(lock) => return Ok(lock),
            Err(e @ ControllerError::AttemptInProgress { .. }) => e,
            Err(e) => return Err(e),
        };

        if !self.lock_is_stale(stack).await {
            return Err(err);
        }

        warn!("Reclaiming stale lock for stack '{}'", stack);
        StackLock::break_lock(&self.locks_dir, stack).await?;
        StackLock::acquire(&self.locks_dir, stack, attempt_id).await
    }

    /// A lock is stale when the attempt holding it is recorded as terminal
    async fn lock_is_stale(&self, stack: &str) -> bool {
        let holder = match StackLock::holder(&self.locks_dir, stack).await {
            Ok(Some(holder)) => holder,
            _ => return false,
        };
        match self.store.latest(stack).await {
            Ok(Some(latest)) => latest.id == holder.attempt_id && latest.is_terminal(),
            _ => false,
        }
    }

    async fn finish(&self, attempt: DeploymentAttempt) -> Result<DeploymentAttempt, ControllerError> {
        if !attempt.is_terminal() {
            return Err(ControllerError::Internal(format!(
                "attempt {} stopped in non-terminal phase {}",
                attempt.id,
                attempt.phase()
            )));
        }

        info!(
            "Attempt {} for stack '{}' finished in {}",
            attempt.id,
            attempt.stack,
            attempt.phase()
        );
        let annotation = Annotation::from_attempt(&attempt, &self.tags);
        notify_best_effort(self.notifier.as_ref(), &annotation).await;
        Ok(attempt)
    }
}

/// Stack names become file names under the state directory
fn check_stack_name(stack: &str) -> Result<(), ControllerError> {
    if NAME_RE.is_match(stack) {
        Ok(())
    } else {
        Err(ControllerError::InvalidStackName(stack.to_string()))
    }
}
