//! Settings file management

use std::path::PathBuf;

use secrecy::SecretString;
use serde::Deserialize;
use tracing::debug;

use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Controller settings, read from a JSON file.
///
/// Every field has a default so the file may be partial or missing.
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub json_logs: bool,

    /// Also write logs to daily files in this directory
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// State directory override
    #[serde(default)]
    pub state_dir: Option<PathBuf>,

    #[serde(default)]
    pub orchestrator: OrchestratorSettings,

    #[serde(default)]
    pub convergence: ConvergenceSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub notify: NotifySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            json_logs: false,
            log_dir: None,
            state_dir: None,
            orchestrator: OrchestratorSettings::default(),
            convergence: ConvergenceSettings::default(),
            health: HealthSettings::default(),
            notify: NotifySettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from a file, falling back to defaults when it is absent
    pub async fn load(file: &File) -> Result<Self, ControllerError> {
        if !file.exists().await {
            debug!("No settings file at {}, using defaults", file.path().display());
            return Ok(Self::default());
        }

        file.read_json().await.map_err(|e| {
            ControllerError::ConfigError(format!(
                "unable to read settings file {}: {}",
                file.path().display(),
                e
            ))
        })
    }
}

/// Orchestrator client settings
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSettings {
    /// Path or name of the docker binary
    #[serde(default = "default_docker_bin")]
    pub docker_bin: String,

    /// Timeout for a single orchestrator command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Attempts for a query that fails with a transient error
    #[serde(default = "default_query_attempts")]
    pub query_retry_attempts: u32,

    /// First delay between query retries
    #[serde(default = "default_query_base_delay")]
    pub query_retry_base_delay_ms: u64,

    /// Cap on the delay between query retries
    #[serde(default = "default_query_max_delay")]
    pub query_retry_max_delay_secs: u64,
}

fn default_docker_bin() -> String {
    "docker".to_string()
}

fn default_command_timeout() -> u64 {
    60
}

fn default_query_attempts() -> u32 {
    3
}

fn default_query_base_delay() -> u64 {
    1000
}

fn default_query_max_delay() -> u64 {
    10
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            docker_bin: default_docker_bin(),
            command_timeout_secs: default_command_timeout(),
            query_retry_attempts: default_query_attempts(),
            query_retry_base_delay_ms: default_query_base_delay(),
            query_retry_max_delay_secs: default_query_max_delay(),
        }
    }
}

/// Convergence monitoring settings
#[derive(Debug, Clone, Deserialize)]
pub struct ConvergenceSettings {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Wall-clock budget for the whole stack to converge
    #[serde(default = "default_convergence_timeout")]
    pub timeout_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}

fn default_convergence_timeout() -> u64 {
    300
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            timeout_secs: default_convergence_timeout(),
        }
    }
}

/// Health verification settings
#[derive(Debug, Clone, Deserialize)]
pub struct HealthSettings {
    /// URL template; `{stack}` is replaced by the stack name
    #[serde(default = "default_url_template")]
    pub url_template: String,

    /// Wait after convergence before the first probe
    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,

    /// Maximum number of probes
    #[serde(default = "default_health_retries")]
    pub retries: u32,

    /// Fixed delay between probes
    #[serde(default = "default_health_backoff")]
    pub backoff_secs: u64,

    /// Timeout of a single probe
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

pub fn default_url_template() -> String {
    "http://{stack}.localhost/health".to_string()
}

fn default_settle_delay() -> u64 {
    10
}

fn default_health_retries() -> u32 {
    30
}

fn default_health_backoff() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    5
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            settle_delay_secs: default_settle_delay(),
            retries: default_health_retries(),
            backoff_secs: default_health_backoff(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Notification sink settings
#[derive(Debug, Default, Deserialize)]
pub struct NotifySettings {
    /// Annotation webhook; notifications are disabled when absent
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Bearer token sent to the webhook
    #[serde(default)]
    pub token: Option<SecretString>,

    /// Extra tags attached to every annotation
    #[serde(default)]
    pub tags: Vec<String>,
}
