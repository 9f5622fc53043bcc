//! Attempt state machine tests

use stackroll::errors::ControllerError;
use stackroll::models::attempt::{AttemptEvent, DeploymentAttempt, Outcome, Phase};

fn attempt_in(events: Vec<AttemptEvent>) -> DeploymentAttempt {
    let mut attempt = DeploymentAttempt::new("web");
    for event in events {
        attempt.process(event).unwrap();
    }
    attempt
}

#[test]
fn test_attempt_initial_state() {
    let attempt = DeploymentAttempt::new("web");
    assert_eq!(attempt.phase(), Phase::Idle);
    assert!(!attempt.is_terminal());
    assert!(attempt.outcome().is_none());
    assert!(attempt.snapshot.is_empty());
    assert_eq!(attempt.history().len(), 1);
}

#[test]
fn test_attempt_ids_are_unique() {
    assert_ne!(DeploymentAttempt::new("web").id, DeploymentAttempt::new("web").id);
}

#[test]
fn test_validation_failure_flow() {
    let attempt = attempt_in(vec![
        AttemptEvent::Validate,
        AttemptEvent::ValidationFailed("services: at least one service is required".to_string()),
    ]);

    assert_eq!(attempt.phase(), Phase::ValidationError);
    assert_eq!(attempt.outcome(), Some(Outcome::Rejected));
    assert_eq!(attempt.diagnostics.len(), 1);
    assert_eq!(attempt.diagnostics[0].phase, Phase::Validating);
}

#[test]
fn test_health_failure_flow() {
    let attempt = attempt_in(vec![
        AttemptEvent::Validate,
        AttemptEvent::Submitted,
        AttemptEvent::StartConvergence,
        AttemptEvent::Converged,
        AttemptEvent::StartHealthCheck,
        AttemptEvent::HealthFailed,
        AttemptEvent::StartRollback,
        AttemptEvent::RolledBack,
    ]);

    assert_eq!(attempt.phase(), Phase::RolledBack);
    assert!(attempt.reached(Phase::HealthCheckFailed));
    assert!(!attempt.reached(Phase::ConvergenceTimeout));
}

#[test]
fn test_invalid_transitions_are_rejected() {
    let mut attempt = DeploymentAttempt::new("web");
    let err = attempt.process(AttemptEvent::Submitted).unwrap_err();
    assert!(matches!(err, ControllerError::InvalidTransition(_)));
    assert_eq!(attempt.phase(), Phase::Idle);

    // automatic rollback only after a detected failure
    let mut attempt = attempt_in(vec![
        AttemptEvent::Validate,
        AttemptEvent::Submitted,
        AttemptEvent::StartConvergence,
        AttemptEvent::Converged,
    ]);
    assert!(attempt.process(AttemptEvent::StartRollback).is_err());
    assert_eq!(attempt.phase(), Phase::Converged);
}

#[test]
fn test_terminal_phases_do_not_move_on() {
    let mut healthy = attempt_in(vec![
        AttemptEvent::Validate,
        AttemptEvent::Submitted,
        AttemptEvent::StartConvergence,
        AttemptEvent::Converged,
        AttemptEvent::StartHealthCheck,
        AttemptEvent::HealthPassed,
    ]);
    assert!(healthy.process(AttemptEvent::Abort).is_err());
    assert!(healthy.process(AttemptEvent::StartConvergence).is_err());
    assert_eq!(healthy.phase(), Phase::Healthy);

    // only an operator rollback may follow
    assert_eq!(
        healthy.process(AttemptEvent::RollbackRequested).unwrap(),
        Phase::RollingBack
    );
}

#[test]
fn test_manual_rollback_needs_something_to_undo() {
    let rejected = [
        attempt_in(vec![]),
        attempt_in(vec![AttemptEvent::Validate]),
        attempt_in(vec![
            AttemptEvent::Validate,
            AttemptEvent::ValidationFailed("bad".to_string()),
        ]),
        attempt_in(vec![
            AttemptEvent::Validate,
            AttemptEvent::SubmissionFailed("rejected".to_string()),
        ]),
    ];
    for attempt in rejected {
        assert!(!attempt.allows_manual_rollback(), "{}", attempt.phase());
    }

    let submitted = [
        vec![AttemptEvent::Validate, AttemptEvent::Submitted],
        vec![
            AttemptEvent::Validate,
            AttemptEvent::Submitted,
            AttemptEvent::StartConvergence,
        ],
        vec![
            AttemptEvent::Validate,
            AttemptEvent::Submitted,
            AttemptEvent::StartConvergence,
            AttemptEvent::Abort,
        ],
        vec![
            AttemptEvent::Validate,
            AttemptEvent::Submitted,
            AttemptEvent::RollbackRequested,
            AttemptEvent::RollbackUnavailable(vec!["db".to_string()]),
        ],
    ];
    for events in submitted {
        let attempt = attempt_in(events);
        assert!(attempt.allows_manual_rollback(), "{}", attempt.phase());
    }
}

#[test]
fn test_snapshot_taken_before_an_interrupted_submission_allows_rollback() {
    let mut attempt = attempt_in(vec![AttemptEvent::Validate]);
    attempt
        .snapshot
        .insert("api".to_string(), "registry.example.com/shop/api:1.0".to_string());

    assert_eq!(attempt.phase(), Phase::Validating);
    assert!(attempt.allows_manual_rollback());
    assert_eq!(
        attempt.process(AttemptEvent::RollbackRequested).unwrap(),
        Phase::RollingBack
    );
}

#[test]
fn test_rollback_request_refused_without_snapshot() {
    let mut attempt = attempt_in(vec![AttemptEvent::Validate]);
    assert!(matches!(
        attempt.process(AttemptEvent::RollbackRequested),
        Err(ControllerError::InvalidTransition(_))
    ));
    assert_eq!(attempt.phase(), Phase::Validating);
}

#[test]
fn test_exit_codes() {
    assert_eq!(Phase::Healthy.exit_code(), 0);
    assert_eq!(Phase::ValidationError.exit_code(), 2);
    assert_eq!(Phase::SubmissionError.exit_code(), 3);
    assert_eq!(Phase::RolledBack.exit_code(), 4);
    assert_eq!(Phase::Aborted.exit_code(), 5);
    assert_eq!(Phase::RollbackUnavailable.exit_code(), 6);
    assert_eq!(Phase::Converging.exit_code(), 9);
}

#[test]
fn test_attempt_serde_keeps_phase_and_history() {
    let attempt = attempt_in(vec![
        AttemptEvent::Validate,
        AttemptEvent::Submitted,
        AttemptEvent::StartConvergence,
    ]);

    let json = serde_json::to_value(&attempt).unwrap();
    assert_eq!(json["phase"], "converging");
    assert_eq!(json["history"].as_array().unwrap().len(), 4);

    let parsed: DeploymentAttempt = serde_json::from_value(json).unwrap();
    assert_eq!(parsed.phase(), Phase::Converging);
    assert_eq!(parsed, attempt);
}
