//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{debug, error};

use crate::errors::ControllerError;

/// HTTP client shared by the health probe and the notification sink
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client with a default request timeout
    pub fn new(timeout: Duration) -> Result<Self, ControllerError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("stackroll/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }

    /// GET `url` and return the status, whatever it is.
    ///
    /// Only transport failures (connect, timeout, TLS) are errors.
    pub async fn get_status(&self, url: &str, timeout: Duration) -> Result<StatusCode, reqwest::Error> {
        debug!("GET {}", url);
        let response = self.client.get(url).timeout(timeout).send().await?;
        Ok(response.status())
    }

    /// POST a JSON body, failing on any non-2xx status
    pub async fn post_json<B: Serialize>(
        &self,
        url: &str,
        token: Option<&SecretString>,
        body: &B,
    ) -> Result<(), ControllerError> {
        debug!("POST {}", url);

        let mut request = self.client.post(url).json(body);
        if let Some(token) = token {
            request = request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            );
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP POST failed: {} - {}", status, body);
            return Err(ControllerError::NotifyError(format!("{}: {}", status, body)));
        }

        Ok(())
    }
}
