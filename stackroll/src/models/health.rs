//! Health check models

use serde::{Deserialize, Serialize};

/// Result of a single probe of the health endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ProbeOutcome {
    /// The endpoint answered with this HTTP status
    Status(u16),

    /// The request never produced a response
    TransportError(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Status(code) if (200..300).contains(code))
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::Status(code) => write!(f, "HTTP {}", code),
            ProbeOutcome::TransportError(e) => write!(f, "transport error: {}", e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Healthy,
    Unhealthy,
}

/// Outcome of the health verification phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// URL that was probed
    pub url: String,

    /// Number of probes issued
    pub attempts: u32,

    /// Last status or transport error observed
    pub last: Option<ProbeOutcome>,

    pub verdict: Verdict,
}
