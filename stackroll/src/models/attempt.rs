//! Deployment attempt record and its state machine

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ControllerError;
use crate::models::health::HealthCheckResult;
use crate::utils::generate_uuid;

/// Phase of a deployment attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Validating,
    Submitted,
    Converging,
    Converged,
    ConvergenceTimeout,
    HealthChecking,
    Healthy,
    HealthCheckFailed,
    RollingBack,
    RolledBack,
    RollbackUnavailable,
    ValidationError,
    SubmissionError,
    Aborted,
}

/// Coarse classification of a terminal phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// New stack is running and healthy
    Success,

    /// Deployment failed, previous images restored
    Recovered,

    /// Deployment failed and recovery failed too; needs an operator
    Unrecovered,

    /// Rejected before anything was changed
    Rejected,

    /// Interrupted by the operator
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        self.outcome().is_some()
    }

    /// Classification of a terminal phase, `None` while in flight.
    ///
    /// `ConvergenceTimeout` and `HealthCheckFailed` are not terminal: the
    /// controller always moves on to rollback from them.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Phase::Healthy => Some(Outcome::Success),
            Phase::RolledBack => Some(Outcome::Recovered),
            Phase::RollbackUnavailable => Some(Outcome::Unrecovered),
            Phase::ValidationError | Phase::SubmissionError => Some(Outcome::Rejected),
            Phase::Aborted => Some(Outcome::Aborted),
            _ => None,
        }
    }

    /// Process exit code reported for an attempt that ended in this phase
    pub fn exit_code(&self) -> i32 {
        match self {
            Phase::Healthy => 0,
            Phase::ValidationError => 2,
            Phase::SubmissionError => 3,
            Phase::RolledBack => 4,
            Phase::Aborted => 5,
            Phase::RollbackUnavailable => 6,
            _ => 9,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Idle => "Idle",
            Phase::Validating => "Validating",
            Phase::Submitted => "Submitted",
            Phase::Converging => "Converging",
            Phase::Converged => "Converged",
            Phase::ConvergenceTimeout => "ConvergenceTimeout",
            Phase::HealthChecking => "HealthChecking",
            Phase::Healthy => "Healthy",
            Phase::HealthCheckFailed => "HealthCheckFailed",
            Phase::RollingBack => "RollingBack",
            Phase::RolledBack => "RolledBack",
            Phase::RollbackUnavailable => "RollbackUnavailable",
            Phase::ValidationError => "ValidationError",
            Phase::SubmissionError => "SubmissionError",
            Phase::Aborted => "Aborted",
        };
        f.write_str(s)
    }
}

/// Events driving an attempt from one phase to the next
#[derive(Debug, Clone)]
pub enum AttemptEvent {
    /// Start validating the stack file
    Validate,

    /// Spec rejected by the validator
    ValidationFailed(String),

    /// Snapshot recorded and spec accepted by the orchestrator
    Submitted,

    /// Orchestrator rejected the stack, or could not be reached before submission
    SubmissionFailed(String),

    /// Start watching replica counts
    StartConvergence,

    /// Every service reached its desired replica count in one round
    Converged,

    /// The convergence deadline passed
    ConvergenceTimedOut,

    /// Start probing the health endpoint
    StartHealthCheck,

    /// Health endpoint answered 2xx
    HealthPassed,

    /// Health retries exhausted
    HealthFailed,

    /// Automatic rollback after a detected failure
    StartRollback,

    /// Operator asked for a rollback of this attempt
    RollbackRequested,

    /// Every snapshot image was reapplied
    RolledBack,

    /// Rollback could not restore every service
    RollbackUnavailable(Vec<String>),

    /// Operator abort during a wait
    Abort,
}

/// A dated note attached to an attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub at: DateTime<Utc>,
    pub phase: Phase,
    pub message: String,
}

/// A phase change, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseChange {
    pub at: DateTime<Utc>,
    pub phase: Phase,
}

/// Per-service detail for a service that did not converge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLag {
    pub service: String,
    pub desired: u32,
    pub current: u32,
    #[serde(default)]
    pub task_errors: Vec<String>,
}

/// Diagnostic snapshot of the last polling round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceReport {
    /// Polling rounds completed
    pub rounds: u32,

    /// Services not converged in the last round (empty when converged)
    pub lagging: Vec<ServiceLag>,
}

/// What the rollback did, per service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Services whose snapshot image was reapplied
    pub restored: BTreeMap<String, String>,

    /// Services with no snapshot entry
    pub missing_snapshot: Vec<String>,

    /// Services whose reapplication failed, with the reason
    pub failed: BTreeMap<String, String>,
}

impl RollbackReport {
    /// Services that could not be restored, in name order
    pub fn unavailable(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .missing_snapshot
            .iter()
            .chain(self.failed.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// One deploy (or manual rollback) of one stack.
///
/// Owned by the controller for the lifetime of the attempt and persisted on
/// every phase change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentAttempt {
    pub id: String,

    pub stack: String,

    /// Digest of the submitted spec
    pub spec_digest: Option<String>,

    /// Services named by the stack file, in document order
    #[serde(default)]
    pub services: Vec<String>,

    /// Image each service ran before submission
    #[serde(default)]
    pub snapshot: BTreeMap<String, String>,

    pub started_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    phase: Phase,

    #[serde(default)]
    history: Vec<PhaseChange>,

    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,

    pub convergence: Option<ConvergenceReport>,

    pub health: Option<HealthCheckResult>,

    pub rollback: Option<RollbackReport>,
}

impl DeploymentAttempt {
    /// Create a new attempt in `Idle`
    pub fn new(stack: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_uuid(),
            stack: stack.into(),
            spec_digest: None,
            services: Vec::new(),
            snapshot: BTreeMap::new(),
            started_at: now,
            updated_at: now,
            phase: Phase::Idle,
            history: vec![PhaseChange {
                at: now,
                phase: Phase::Idle,
            }],
            diagnostics: Vec::new(),
            convergence: None,
            health: None,
            rollback: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &[PhaseChange] {
        &self.history
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.phase.outcome()
    }

    /// Attach a diagnostic message in the current phase
    pub fn note(&mut self, message: impl Into<String>) {
        let at = Utc::now();
        self.updated_at = at;
        self.diagnostics.push(Diagnostic {
            at,
            phase: self.phase,
            message: message.into(),
        });
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: AttemptEvent) -> Result<Phase, ControllerError> {
        let next = match (self.phase, &event) {
            (Phase::Idle, AttemptEvent::Validate) => Phase::Validating,

            (Phase::Validating, AttemptEvent::ValidationFailed(reason)) => {
                self.note(reason.clone());
                Phase::ValidationError
            }
            (Phase::Validating, AttemptEvent::Submitted) => Phase::Submitted,
            (Phase::Validating, AttemptEvent::SubmissionFailed(reason)) => {
                self.note(reason.clone());
                Phase::SubmissionError
            }

            (Phase::Submitted, AttemptEvent::StartConvergence) => Phase::Converging,
            (Phase::Converging, AttemptEvent::Converged) => Phase::Converged,
            (Phase::Converging, AttemptEvent::ConvergenceTimedOut) => Phase::ConvergenceTimeout,

            (Phase::Converged, AttemptEvent::StartHealthCheck) => Phase::HealthChecking,
            (Phase::HealthChecking, AttemptEvent::HealthPassed) => Phase::Healthy,
            (Phase::HealthChecking, AttemptEvent::HealthFailed) => Phase::HealthCheckFailed,

            (Phase::ConvergenceTimeout | Phase::HealthCheckFailed, AttemptEvent::StartRollback) => {
                Phase::RollingBack
            }
            (_, AttemptEvent::RollbackRequested) if self.allows_manual_rollback() => {
                Phase::RollingBack
            }
            (Phase::RollingBack, AttemptEvent::RolledBack) => Phase::RolledBack,
            (Phase::RollingBack, AttemptEvent::RollbackUnavailable(services)) => {
                self.note(format!(
                    "rollback unavailable for service(s): {}",
                    services.join(", ")
                ));
                Phase::RollbackUnavailable
            }

            (
                Phase::Submitted | Phase::Converging | Phase::Converged | Phase::HealthChecking,
                AttemptEvent::Abort,
            ) => Phase::Aborted,

            (phase, event) => {
                return Err(ControllerError::InvalidTransition(format!(
                    "{} -> {:?}",
                    phase, event
                )));
            }
        };

        let at = Utc::now();
        self.phase = next;
        self.updated_at = at;
        self.history.push(PhaseChange { at, phase: next });
        Ok(next)
    }

    /// Whether an operator rollback has something to undo.
    ///
    /// An attempt still in `Validating` with a recorded snapshot was
    /// interrupted around submission; the stack may have changed, so it
    /// qualifies. `ValidationError` and `SubmissionError` never reached the
    /// cluster.
    pub fn allows_manual_rollback(&self) -> bool {
        match self.phase {
            Phase::Idle | Phase::ValidationError | Phase::SubmissionError => false,
            Phase::Validating => !self.snapshot.is_empty(),
            _ => true,
        }
    }

    /// Whether the given phase was ever entered
    pub fn reached(&self, phase: Phase) -> bool {
        self.history.iter().any(|change| change.phase == phase)
    }
}
