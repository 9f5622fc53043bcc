//! HTTP probe and webhook notifier against a mock server

use std::time::Duration;

use httpmock::{Method::GET, Method::POST, MockServer};
use secrecy::SecretString;
use serde_json::json;

use stackroll::deploy::health::{HealthProbe, HttpProbe};
use stackroll::http::client::HttpClient;
use stackroll::models::attempt::{AttemptEvent, DeploymentAttempt};
use stackroll::models::health::ProbeOutcome;
use stackroll::notify::{notify_best_effort, Annotation, Notifier, WebhookNotifier};

fn client() -> HttpClient {
    HttpClient::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_reports_status() {
    let server = MockServer::start_async().await;
    let ok = server.mock(|when, then| {
        when.method(GET).path("/web/health");
        then.status(200).body("ok");
    });
    let failing = server.mock(|when, then| {
        when.method(GET).path("/shop/health");
        then.status(500);
    });

    let probe = HttpProbe::new(client());
    let timeout = Duration::from_secs(2);

    let outcome = probe.probe(&server.url("/web/health"), timeout).await;
    assert_eq!(outcome, ProbeOutcome::Status(200));
    assert!(outcome.is_success());

    let outcome = probe.probe(&server.url("/shop/health"), timeout).await;
    assert_eq!(outcome, ProbeOutcome::Status(500));
    assert!(!outcome.is_success());

    ok.assert();
    failing.assert();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_probe_transport_error() {
    let probe = HttpProbe::new(client());
    // nothing listens on port 9 on the loopback interface
    let outcome = probe
        .probe("http://127.0.0.1:9/health", Duration::from_secs(2))
        .await;
    assert!(matches!(outcome, ProbeOutcome::TransportError(_)));
    assert!(!outcome.is_success());
}

fn finished_attempt() -> DeploymentAttempt {
    let mut attempt = DeploymentAttempt::new("web");
    for event in [
        AttemptEvent::Validate,
        AttemptEvent::Submitted,
        AttemptEvent::StartConvergence,
        AttemptEvent::Converged,
        AttemptEvent::StartHealthCheck,
        AttemptEvent::HealthPassed,
    ] {
        attempt.process(event).unwrap();
    }
    attempt
}

#[tokio::test(flavor = "multi_thread")]
async fn test_webhook_posts_annotation() {
    let server = MockServer::start_async().await;
    let attempt = finished_attempt();

    let mock = server.mock(|when, then| {
        when.method(POST)
            .path("/annotations")
            .header("authorization", "Bearer s3cret")
            .json_body_partial(
                json!({
                    "stack": "web",
                    "attempt_id": attempt.id,
                    "phase": "healthy",
                    "tags": ["stackroll", "stack:web", "phase:Healthy", "env:prod"]
                })
                .to_string(),
            );
        then.status(200);
    });

    let notifier = WebhookNotifier::new(
        client(),
        server.url("/annotations"),
        Some(SecretString::from("s3cret".to_string())),
    );
    let annotation = Annotation::from_attempt(&attempt, &["env:prod".to_string()]);
    notifier.notify(&annotation).await.unwrap();

    mock.assert();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_webhook_failure_is_an_error_but_best_effort_swallows_it() {
    let server = MockServer::start_async().await;
    let mock = server.mock(|when, then| {
        when.method(POST).path("/annotations");
        then.status(503).body("maintenance");
    });

    let notifier = WebhookNotifier::new(client(), server.url("/annotations"), None);
    let annotation = Annotation::from_attempt(&finished_attempt(), &[]);

    assert!(notifier.notify(&annotation).await.is_err());
    notify_best_effort(&notifier, &annotation).await;

    mock.assert_hits(2);
}
