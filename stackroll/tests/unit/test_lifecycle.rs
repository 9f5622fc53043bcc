//! Locking, cancellation, manual rollback and status

use stackroll::errors::ControllerError;
use stackroll::models::attempt::{AttemptEvent, DeploymentAttempt, Phase};
use stackroll::schedule::{AbortHandle, AbortSignal};
use stackroll::storage::lock::StackLock;

use crate::support::{previous_images, FakeOrchestrator, FakeProbe, Harness, WEB_STACK};

#[tokio::test]
async fn test_concurrent_deploy_is_rejected() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    let _held = StackLock::acquire(&harness.layout.locks_dir(), "web", "in-flight")
        .await
        .unwrap();

    let err = harness
        .controller
        .deploy_source("web", WEB_STACK, &AbortSignal::never())
        .await
        .unwrap_err();

    match err {
        ControllerError::AttemptInProgress { stack, holder } => {
            assert_eq!(stack, "web");
            assert!(holder.contains("in-flight"));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_eq!(harness.orchestrator.image_queries(), 0);
    assert_eq!(harness.orchestrator.submitted(), 0);
}

#[tokio::test]
async fn test_other_stacks_are_not_blocked() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    let _held = StackLock::acquire(&harness.layout.locks_dir(), "billing", "in-flight")
        .await
        .unwrap();

    let attempt = harness
        .controller
        .deploy_source("web", WEB_STACK, &AbortSignal::never())
        .await
        .unwrap();
    assert_eq!(attempt.phase(), Phase::Healthy);
}

#[tokio::test]
async fn test_lock_released_after_attempt() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );

    for _ in 0..2 {
        let attempt = harness
            .controller
            .deploy_source("web", WEB_STACK, &AbortSignal::never())
            .await
            .unwrap();
        assert_eq!(attempt.phase(), Phase::Healthy);
    }
    assert!(StackLock::holder(&harness.layout.locks_dir(), "web")
        .await
        .unwrap()
        .is_none());
    assert_eq!(harness.store.history("web").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_stale_lock_of_finished_attempt_is_reclaimed() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    let first = harness
        .controller
        .deploy_source("web", WEB_STACK, &AbortSignal::never())
        .await
        .unwrap();

    // left behind by a process killed after recording its outcome
    let stale = StackLock::acquire(&harness.layout.locks_dir(), "web", &first.id)
        .await
        .unwrap();
    std::mem::forget(stale);

    let second = harness
        .controller
        .deploy_source("web", WEB_STACK, &AbortSignal::never())
        .await
        .unwrap();
    assert_eq!(second.phase(), Phase::Healthy);
}

#[tokio::test]
async fn test_abort_while_converging() {
    let orchestrator = FakeOrchestrator::with_images(&previous_images());
    orchestrator.progress("api", &[0]);
    let abort = AbortHandle::new();
    // third round of three services
    orchestrator.abort_after_state_queries(7, abort.clone());
    let harness = Harness::new(orchestrator, FakeProbe::always(200));

    let attempt = harness
        .controller
        .deploy_source("web", WEB_STACK, &abort.signal())
        .await
        .unwrap();

    assert_eq!(attempt.phase(), Phase::Aborted);
    assert_eq!(attempt.phase().exit_code(), 5);
    assert!(!attempt.reached(Phase::RollingBack));
    assert!(harness.orchestrator.updates().is_empty());
    assert_eq!(harness.probe.probes(), 0);
    assert_eq!(attempt.convergence.as_ref().unwrap().rounds, 3);

    // the snapshot survives for a manual rollback
    let latest = harness.store.latest("web").await.unwrap().unwrap();
    assert_eq!(latest.phase(), Phase::Aborted);
    assert_eq!(latest.snapshot.len(), 3);
}

#[tokio::test]
async fn test_abort_during_settle_delay() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    let abort = AbortHandle::new();
    // converges in the first round; abort before the settle delay elapses
    harness.orchestrator.abort_after_state_queries(3, abort.clone());

    let attempt = harness
        .controller
        .deploy_source("web", WEB_STACK, &abort.signal())
        .await
        .unwrap();

    assert!(attempt.reached(Phase::HealthChecking));
    assert_eq!(attempt.phase(), Phase::Aborted);
    assert_eq!(harness.probe.probes(), 0);
}

#[tokio::test]
async fn test_abort_between_health_probes() {
    let probe = FakeProbe::always(502);
    let abort = AbortHandle::new();
    probe.abort_after(4, abort.clone());
    let harness = Harness::new(FakeOrchestrator::with_images(&previous_images()), probe);

    let attempt = harness
        .controller
        .deploy_source("web", WEB_STACK, &abort.signal())
        .await
        .unwrap();

    assert_eq!(attempt.phase(), Phase::Aborted);
    assert_eq!(harness.probe.probes(), 4);
    assert_eq!(attempt.health.as_ref().unwrap().attempts, 4);
    assert!(!attempt.reached(Phase::HealthCheckFailed));
}

#[tokio::test]
async fn test_abort_after_failure_does_not_skip_rollback() {
    let orchestrator = FakeOrchestrator::with_images(&previous_images());
    let abort = AbortHandle::new();
    orchestrator.abort_on_update(abort.clone());
    let harness = Harness::new(orchestrator, FakeProbe::always(500));

    let attempt = harness
        .controller
        .deploy_source("web", WEB_STACK, &abort.signal())
        .await
        .unwrap();

    assert!(abort.is_aborted());
    assert_eq!(attempt.phase(), Phase::RolledBack);
    assert_eq!(harness.orchestrator.updates().len(), 3);
    assert!(attempt
        .diagnostics
        .iter()
        .any(|d| d.message.contains("abort was deferred")));
}

#[tokio::test]
async fn test_deploy_then_manual_rollback_restores_previous_images() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    let before = harness.orchestrator.images();

    let deployed = harness
        .controller
        .deploy_source("web", WEB_STACK, &AbortSignal::never())
        .await
        .unwrap();
    assert_eq!(deployed.phase(), Phase::Healthy);
    assert_ne!(harness.orchestrator.images(), before);

    let rolled_back = harness.controller.rollback("web", false).await.unwrap();
    assert_eq!(rolled_back.id, deployed.id);
    assert_eq!(rolled_back.phase(), Phase::RolledBack);
    assert_eq!(harness.orchestrator.images(), before);

    let latest = harness.store.latest("web").await.unwrap().unwrap();
    assert_eq!(latest.phase(), Phase::RolledBack);
    assert!(latest.reached(Phase::Healthy));
}

#[tokio::test]
async fn test_manual_rollback_after_abort() {
    let orchestrator = FakeOrchestrator::with_images(&previous_images());
    orchestrator.progress("api", &[0]);
    let abort = AbortHandle::new();
    orchestrator.abort_after_state_queries(1, abort.clone());
    let harness = Harness::new(orchestrator, FakeProbe::always(200));

    let aborted = harness
        .controller
        .deploy_source("web", WEB_STACK, &abort.signal())
        .await
        .unwrap();
    assert_eq!(aborted.phase(), Phase::Aborted);

    let rolled_back = harness.controller.rollback("web", false).await.unwrap();
    assert_eq!(rolled_back.phase(), Phase::RolledBack);
    assert_eq!(
        harness.orchestrator.images()["api"],
        "registry.example.com/shop/api:1.0"
    );
}

#[tokio::test]
async fn test_manual_rollback_refused_without_snapshot() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    harness
        .controller
        .deploy_source("web", "services: {}\n", &AbortSignal::never())
        .await
        .unwrap();

    let err = harness.controller.rollback("web", false).await.unwrap_err();
    assert!(matches!(err, ControllerError::RollbackRefused(_)));
}

#[tokio::test]
async fn test_rollback_skips_attempts_that_never_reached_the_cluster() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    let before = harness.orchestrator.images();
    let never = AbortSignal::never();

    let deployed = harness
        .controller
        .deploy_source("web", WEB_STACK, &never)
        .await
        .unwrap();
    assert_eq!(deployed.phase(), Phase::Healthy);

    let typo = harness
        .controller
        .deploy_source("web", "services: {}\n", &never)
        .await
        .unwrap();
    assert_eq!(typo.phase(), Phase::ValidationError);

    harness.orchestrator.reject_submit("image not found");
    let rejected = harness
        .controller
        .deploy_source("web", WEB_STACK, &never)
        .await
        .unwrap();
    assert_eq!(rejected.phase(), Phase::SubmissionError);

    let rolled_back = harness.controller.rollback("web", false).await.unwrap();
    assert_eq!(rolled_back.id, deployed.id);
    assert_eq!(rolled_back.phase(), Phase::RolledBack);
    assert_eq!(harness.orchestrator.images(), before);
}

#[tokio::test]
async fn test_rollback_after_crash_between_snapshot_and_submission() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&[
            ("api", "registry.example.com/shop/api:2.0"),
            ("web", "nginx:1.27"),
            ("worker", "registry.example.com/shop/worker:2.0"),
        ]),
        FakeProbe::always(200),
    );

    // what a process killed during submission leaves on disk
    let mut crashed = DeploymentAttempt::new("web");
    crashed.process(AttemptEvent::Validate).unwrap();
    for (service, image) in previous_images() {
        crashed.services.push(service.to_string());
        crashed
            .snapshot
            .insert(service.to_string(), image.to_string());
    }
    harness.store.save(&crashed).await.unwrap();
    let held = StackLock::acquire(&harness.layout.locks_dir(), "web", &crashed.id)
        .await
        .unwrap();
    std::mem::forget(held);

    let rolled_back = harness.controller.rollback("web", true).await.unwrap();
    assert_eq!(rolled_back.id, crashed.id);
    assert_eq!(rolled_back.phase(), Phase::RolledBack);
    assert_eq!(
        harness.orchestrator.images()["api"],
        "registry.example.com/shop/api:1.0"
    );
    assert_eq!(harness.orchestrator.images()["web"], "nginx:1.25");
}

#[tokio::test]
async fn test_unusable_stack_names_touch_no_files() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    let never = AbortSignal::never();

    for stack in ["../x", "../../escaped", "a/b", ".hidden", ""] {
        let err = harness
            .controller
            .deploy_source(stack, WEB_STACK, &never)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidStackName(_)), "{}", stack);

        let err = harness.controller.rollback(stack, true).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidStackName(_)), "{}", stack);

        let err = harness.controller.status(stack, true).await.unwrap_err();
        assert!(matches!(err, ControllerError::InvalidStackName(_)), "{}", stack);
    }

    assert_eq!(harness.orchestrator.image_queries(), 0);
    assert_eq!(harness.orchestrator.submitted(), 0);
    let state_dir = harness.layout.attempts_dir().path().parent().unwrap().to_path_buf();
    let root = state_dir.parent().unwrap();
    assert_eq!(std::fs::read_dir(root).unwrap().count(), 0);
}

#[tokio::test]
async fn test_rollback_and_status_without_attempt() {
    let harness = Harness::new(FakeOrchestrator::default(), FakeProbe::always(200));

    let err = harness.controller.rollback("ghost", false).await.unwrap_err();
    assert!(matches!(err, ControllerError::NoAttempt(_)));

    let err = harness.controller.status("ghost", false).await.unwrap_err();
    assert!(matches!(err, ControllerError::NoAttempt(_)));
}

#[tokio::test]
async fn test_forced_rollback_breaks_live_lock() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    let deployed = harness
        .controller
        .deploy_source("web", WEB_STACK, &AbortSignal::never())
        .await
        .unwrap();

    let held = StackLock::acquire(&harness.layout.locks_dir(), "web", "crashed-run")
        .await
        .unwrap();
    std::mem::forget(held);

    let err = harness.controller.rollback("web", false).await.unwrap_err();
    assert!(matches!(err, ControllerError::AttemptInProgress { .. }));

    let rolled_back = harness.controller.rollback("web", true).await.unwrap();
    assert_eq!(rolled_back.id, deployed.id);
    assert_eq!(rolled_back.phase(), Phase::RolledBack);
}

#[tokio::test]
async fn test_status_reports_attempt_and_live_state() {
    let harness = Harness::new(
        FakeOrchestrator::with_images(&previous_images()),
        FakeProbe::always(200),
    );
    harness
        .controller
        .deploy_source("web", WEB_STACK, &AbortSignal::never())
        .await
        .unwrap();

    let status = harness.controller.status("web", false).await.unwrap();
    assert_eq!(status.attempt.phase(), Phase::Healthy);
    assert!(status.lock.is_none());
    assert!(status.live.is_empty());

    let status = harness.controller.status("web", true).await.unwrap();
    let services: Vec<&str> = status.live.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(services, vec!["api", "web", "worker"]);
    let (_, api) = &status.live[0];
    let api = api.as_ref().unwrap();
    assert_eq!(api.desired, 3);
    assert!(api.is_converged());
}
