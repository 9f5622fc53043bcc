//! ConvergenceMonitor: wait until every service runs its desired replicas

use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::deploy::advance;
use crate::deploy::cluster::Cluster;
use crate::errors::ControllerError;
use crate::models::attempt::{
    AttemptEvent, ConvergenceReport, DeploymentAttempt, Phase, ServiceLag,
};
use crate::models::service::ServiceState;
use crate::models::spec::{ServiceDef, StackSpec};
use crate::orchestrator::OrchestratorError;
use crate::retry::{RetryPolicy, Tick};
use crate::schedule::AbortSignal;
use crate::storage::attempts::AttemptStore;

/// Convergence options
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceOptions {
    /// Delay between polling rounds
    pub poll_interval: Duration,

    /// Wall-clock budget for the whole stack
    pub timeout: Duration,
}

impl Default for ConvergenceOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

pub struct ConvergenceMonitor {
    cluster: Cluster,
    store: AttemptStore,
    options: ConvergenceOptions,
}

impl ConvergenceMonitor {
    pub fn new(cluster: Cluster, store: AttemptStore, options: ConvergenceOptions) -> Self {
        Self {
            cluster,
            store,
            options,
        }
    }

    /// Poll until converged, timed out, or aborted.
    ///
    /// Expects `Submitted`; leaves the attempt in `Converged`,
    /// `ConvergenceTimeout` or `Aborted`. Polling only reads, so running it
    /// again for the same stack is harmless.
    pub async fn watch(
        &self,
        attempt: &mut DeploymentAttempt,
        spec: &StackSpec,
        abort: &AbortSignal,
    ) -> Result<Phase, ControllerError> {
        advance(&self.store, attempt, AttemptEvent::StartConvergence).await?;
        info!(
            "Waiting for stack '{}' to converge (timeout {:?}, poll every {:?})",
            spec.name(),
            self.options.timeout,
            self.options.poll_interval
        );

        let policy = RetryPolicy::deadline(self.options.timeout, self.options.poll_interval);
        let mut rounds = policy.rounds(self.cluster.scheduler(), abort);
        let mut lagging: Vec<ServiceLag> = Vec::new();

        loop {
            match rounds.next().await {
                Tick::Round(round) => {
                    let remaining = self.options.timeout.saturating_sub(rounds.elapsed());
                    lagging = self.poll(spec, remaining).await;
                    if lagging.is_empty() {
                        info!("Stack '{}' converged after {} round(s)", spec.name(), round);
                        attempt.convergence = Some(ConvergenceReport {
                            rounds: round,
                            lagging,
                        });
                        return advance(&self.store, attempt, AttemptEvent::Converged).await;
                    }
                    debug!(
                        "Round {}: {} service(s) not converged: {}",
                        round,
                        lagging.len(),
                        describe(&lagging)
                    );
                }
                Tick::Exhausted => {
                    warn!(
                        "Stack '{}' did not converge within {:?}: {}",
                        spec.name(),
                        self.options.timeout,
                        describe(&lagging)
                    );
                    attempt.note(format!(
                        "not converged within {:?} after {} round(s): {}",
                        self.options.timeout,
                        rounds.round(),
                        describe(&lagging)
                    ));
                    attempt.convergence = Some(ConvergenceReport {
                        rounds: rounds.round(),
                        lagging,
                    });
                    return advance(&self.store, attempt, AttemptEvent::ConvergenceTimedOut).await;
                }
                Tick::Aborted => {
                    warn!("Convergence wait for stack '{}' aborted", spec.name());
                    attempt.note(format!(
                        "aborted by operator while converging, after {} round(s)",
                        rounds.round()
                    ));
                    attempt.convergence = Some(ConvergenceReport {
                        rounds: rounds.round(),
                        lagging,
                    });
                    return advance(&self.store, attempt, AttemptEvent::Abort).await;
                }
            }
        }
    }

    /// One polling round: query every service in parallel, then decide.
    /// Returns the services that are not converged.
    ///
    /// Query retries are bounded by what is left of the convergence timeout.
    async fn poll(&self, spec: &StackSpec, remaining: Duration) -> Vec<ServiceLag> {
        let states = join_all(spec.services().iter().map(|service| {
            self.cluster
                .service_state_within(spec.name(), &service.name, remaining)
        }))
        .await;

        spec.services()
            .iter()
            .zip(states)
            .filter_map(|(service, state)| lag(service, state))
            .collect()
    }
}

/// Why a service is not converged, `None` when it is
fn lag(service: &ServiceDef, state: Result<ServiceState, OrchestratorError>) -> Option<ServiceLag> {
    let expected = service.desired_replicas();
    match state {
        Ok(state) => {
            // the orchestrator may still report the previous spec's count
            let desired_matches = expected.is_none_or(|n| n == state.desired);
            if state.is_converged() && desired_matches {
                return None;
            }
            Some(ServiceLag {
                service: service.name.clone(),
                desired: expected.unwrap_or(state.desired),
                current: state.current,
                task_errors: state.task_errors,
            })
        }
        Err(e) => Some(ServiceLag {
            service: service.name.clone(),
            desired: expected.unwrap_or(0),
            current: 0,
            task_errors: vec![match e {
                OrchestratorError::NotFound(_) => "service not created yet".to_string(),
                other => format!("state query failed: {}", other),
            }],
        }),
    }
}

fn describe(lagging: &[ServiceLag]) -> String {
    if lagging.is_empty() {
        return "no round completed".to_string();
    }
    lagging
        .iter()
        .map(|lag| {
            let mut s = format!("{} {}/{}", lag.service, lag.current, lag.desired);
            if let Some(first) = lag.task_errors.first() {
                s.push_str(&format!(" [{}]", first));
            }
            s
        })
        .collect::<Vec<_>>()
        .join(", ")
}
