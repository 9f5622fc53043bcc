//! Notification sink for terminal attempt outcomes
//!
//! Annotations go to an external metrics/annotation system. Delivery is best
//! effort: a failed notification never changes an attempt's outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::errors::ControllerError;
use crate::http::client::HttpClient;
use crate::models::attempt::{DeploymentAttempt, Phase};

/// One annotation per terminal attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub time: DateTime<Utc>,
    pub stack: String,
    pub attempt_id: String,
    pub phase: Phase,
    pub tags: Vec<String>,
    pub text: String,
}

impl Annotation {
    pub fn from_attempt(attempt: &DeploymentAttempt, extra_tags: &[String]) -> Self {
        let mut tags = vec![
            "stackroll".to_string(),
            format!("stack:{}", attempt.stack),
            format!("phase:{}", attempt.phase()),
        ];
        tags.extend(extra_tags.iter().cloned());

        let mut text = format!(
            "Stack '{}' attempt {} finished in {}",
            attempt.stack,
            attempt.id,
            attempt.phase()
        );
        if let Some(last) = attempt.diagnostics.last() {
            text.push_str(": ");
            text.push_str(&last.message);
        }

        Self {
            time: attempt.updated_at,
            stack: attempt.stack.clone(),
            attempt_id: attempt.id.clone(),
            phase: attempt.phase(),
            tags,
            text,
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, annotation: &Annotation) -> Result<(), ControllerError>;
}

/// Send, logging instead of failing
pub async fn notify_best_effort(notifier: &dyn Notifier, annotation: &Annotation) {
    if let Err(e) = notifier.notify(annotation).await {
        warn!(
            "Failed to send notification for attempt {}: {}",
            annotation.attempt_id, e
        );
    }
}

/// Notifier used when no sink is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _annotation: &Annotation) -> Result<(), ControllerError> {
        Ok(())
    }
}

/// POSTs annotations as JSON to a webhook
pub struct WebhookNotifier {
    http_client: HttpClient,
    url: String,
    token: Option<SecretString>,
}

impl WebhookNotifier {
    pub fn new(http_client: HttpClient, url: String, token: Option<SecretString>) -> Self {
        Self {
            http_client,
            url,
            token,
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, annotation: &Annotation) -> Result<(), ControllerError> {
        self.http_client
            .post_json(&self.url, self.token.as_ref(), annotation)
            .await?;
        info!(
            "Sent {} annotation for stack '{}'",
            annotation.phase, annotation.stack
        );
        Ok(())
    }
}
