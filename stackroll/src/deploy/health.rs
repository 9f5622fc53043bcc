//! HealthVerifier: probe the stack's health endpoint after convergence

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::deploy::advance;
use crate::errors::ControllerError;
use crate::http::client::HttpClient;
use crate::models::attempt::{AttemptEvent, DeploymentAttempt, Phase};
use crate::models::health::{HealthCheckResult, ProbeOutcome, Verdict};
use crate::retry::{RetryPolicy, Tick};
use crate::schedule::{wait, AbortSignal, Scheduler, Wait};
use crate::storage::attempts::AttemptStore;

/// Issues a single HTTP GET and reports what came back
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome;
}

/// Probe over the shared HTTP client
pub struct HttpProbe {
    http_client: HttpClient,
}

impl HttpProbe {
    pub fn new(http_client: HttpClient) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl HealthProbe for HttpProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> ProbeOutcome {
        match self.http_client.get_status(url, timeout).await {
            Ok(status) => ProbeOutcome::Status(status.as_u16()),
            Err(e) => ProbeOutcome::TransportError(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthOptions {
    /// URL with a `{stack}` placeholder
    pub url_template: String,

    /// Wait after convergence before the first probe
    pub settle_delay: Duration,

    /// Maximum number of probes
    pub retries: u32,

    /// Delay between probes
    pub backoff: Duration,

    /// Per-request timeout
    pub request_timeout: Duration,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            url_template: crate::storage::settings::default_url_template(),
            settle_delay: Duration::from_secs(10),
            retries: 30,
            backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Expand the URL template for `stack` and check the result parses
pub fn health_url(template: &str, stack: &str) -> Result<String, ControllerError> {
    let expanded = template.replace("{stack}", stack);
    let url = url::Url::parse(&expanded).map_err(|e| {
        ControllerError::ConfigError(format!("invalid health URL '{}': {}", expanded, e))
    })?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(ControllerError::ConfigError(format!(
            "health URL '{}' must use http or https, not {}",
            expanded, other
        ))),
    }
}

pub struct HealthVerifier {
    probe: Arc<dyn HealthProbe>,
    scheduler: Arc<dyn Scheduler>,
    store: AttemptStore,
    options: HealthOptions,
}

impl HealthVerifier {
    pub fn new(
        probe: Arc<dyn HealthProbe>,
        scheduler: Arc<dyn Scheduler>,
        store: AttemptStore,
        options: HealthOptions,
    ) -> Self {
        Self {
            probe,
            scheduler,
            store,
            options,
        }
    }

    /// Probe until a 2xx answer or the retries run out.
    ///
    /// Expects `Converged`; leaves the attempt in `Healthy`,
    /// `HealthCheckFailed` or `Aborted`. Non-2xx statuses and transport
    /// errors count the same.
    pub async fn verify(
        &self,
        attempt: &mut DeploymentAttempt,
        abort: &AbortSignal,
    ) -> Result<Phase, ControllerError> {
        advance(&self.store, attempt, AttemptEvent::StartHealthCheck).await?;

        let url = match health_url(&self.options.url_template, &attempt.stack) {
            Ok(url) => url,
            Err(e) => {
                // no probe can succeed against a bad URL
                warn!("{}", e);
                attempt.note(e.to_string());
                attempt.health = Some(HealthCheckResult {
                    url: self.options.url_template.clone(),
                    attempts: 0,
                    last: None,
                    verdict: Verdict::Unhealthy,
                });
                return advance(&self.store, attempt, AttemptEvent::HealthFailed).await;
            }
        };

        if !self.options.settle_delay.is_zero() {
            debug!("Settling {:?} before probing {}", self.options.settle_delay, url);
            if wait(self.scheduler.as_ref(), self.options.settle_delay, abort).await == Wait::Aborted {
                attempt.note("aborted by operator before the first health probe");
                return advance(&self.store, attempt, AttemptEvent::Abort).await;
            }
        }

        let policy = RetryPolicy::fixed(self.options.retries, self.options.backoff);
        let mut rounds = policy.rounds(self.scheduler.as_ref(), abort);
        let mut last: Option<ProbeOutcome> = None;

        loop {
            match rounds.next().await {
                Tick::Round(n) => {
                    let outcome = self.probe.probe(&url, self.options.request_timeout).await;
                    debug!("Health probe {}/{} {}: {}", n, self.options.retries, url, outcome);
                    let healthy = outcome.is_success();
                    last = Some(outcome);

                    if healthy {
                        info!("Stack '{}' healthy after {} probe(s)", attempt.stack, n);
                        attempt.health = Some(HealthCheckResult {
                            url,
                            attempts: n,
                            last,
                            verdict: Verdict::Healthy,
                        });
                        return advance(&self.store, attempt, AttemptEvent::HealthPassed).await;
                    }
                }
                Tick::Exhausted => {
                    let last_seen = last
                        .as_ref()
                        .map(|o| o.to_string())
                        .unwrap_or_else(|| "no probe issued".to_string());
                    warn!(
                        "Stack '{}' unhealthy after {} probe(s), last: {}",
                        attempt.stack,
                        rounds.round(),
                        last_seen
                    );
                    attempt.note(format!(
                        "health check failed after {} probe(s) of {}; last result: {}",
                        rounds.round(),
                        url,
                        last_seen
                    ));
                    attempt.health = Some(HealthCheckResult {
                        url,
                        attempts: rounds.round(),
                        last,
                        verdict: Verdict::Unhealthy,
                    });
                    return advance(&self.store, attempt, AttemptEvent::HealthFailed).await;
                }
                Tick::Aborted => {
                    warn!("Health check for stack '{}' aborted", attempt.stack);
                    attempt.note(format!(
                        "aborted by operator after {} health probe(s)",
                        rounds.round()
                    ));
                    attempt.health = Some(HealthCheckResult {
                        url,
                        attempts: rounds.round(),
                        last,
                        verdict: Verdict::Unhealthy,
                    });
                    return advance(&self.store, attempt, AttemptEvent::Abort).await;
                }
            }
        }
    }
}
