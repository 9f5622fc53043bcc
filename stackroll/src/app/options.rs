//! Application configuration options
//!
//! Settings file values, overridden by command-line flags, resolved into the
//! option structs every component takes.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::deploy::controller::ControllerOptions;
use crate::deploy::convergence::ConvergenceOptions;
use crate::deploy::health::{health_url, HealthOptions};
use crate::errors::ControllerError;
use crate::logs::{LogLevel, LogOptions};
use crate::orchestrator::swarm::SwarmOptions;
use crate::retry::RetryPolicy;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::CooldownOptions;

/// Values given on the command line; `None` keeps the settings value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub state_dir: Option<PathBuf>,
    pub log_level: Option<LogLevel>,
    pub json_logs: bool,
    pub poll_interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub health_retries: Option<u32>,
    pub health_backoff_secs: Option<u64>,
    pub settle_delay_secs: Option<u64>,
    pub health_url: Option<String>,
}

/// Notification sink options
#[derive(Debug, Default)]
pub struct NotifyOptions {
    pub webhook_url: Option<String>,
    pub token: Option<SecretString>,
}

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    pub layout: StorageLayout,
    pub log: LogOptions,
    pub swarm: SwarmOptions,

    /// Retries for orchestrator calls failing with a transient error
    pub query_retry: RetryPolicy,

    pub controller: ControllerOptions,
    pub notify: NotifyOptions,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            layout: StorageLayout::default(),
            log: LogOptions::default(),
            swarm: SwarmOptions::default(),
            query_retry: RetryPolicy::exponential(3, CooldownOptions::default()),
            controller: ControllerOptions::default(),
            notify: NotifyOptions::default(),
        }
    }
}

impl AppOptions {
    pub fn resolve(settings: Settings, overrides: Overrides) -> Result<Self, ControllerError> {
        let layout = match overrides.state_dir.or(settings.state_dir) {
            Some(dir) => StorageLayout::new(dir),
            None => StorageLayout::default(),
        };

        let log = LogOptions {
            log_level: overrides.log_level.unwrap_or(settings.log_level),
            json_format: overrides.json_logs || settings.json_logs,
            log_dir: settings.log_dir,
            ..Default::default()
        };

        let orchestrator = settings.orchestrator;
        if orchestrator.command_timeout_secs == 0 {
            return Err(ControllerError::ConfigError(
                "orchestrator command timeout must be at least 1 second".to_string(),
            ));
        }
        let swarm = SwarmOptions {
            docker_bin: orchestrator.docker_bin,
            command_timeout: Duration::from_secs(orchestrator.command_timeout_secs),
        };
        let query_retry = RetryPolicy::exponential(
            orchestrator.query_retry_attempts.max(1),
            CooldownOptions {
                base_delay: Duration::from_millis(orchestrator.query_retry_base_delay_ms),
                max_delay: Duration::from_secs(orchestrator.query_retry_max_delay_secs),
                ..Default::default()
            },
        );

        let poll_interval =
            overrides.poll_interval_secs.unwrap_or(settings.convergence.poll_interval_secs);
        if poll_interval == 0 {
            return Err(ControllerError::ConfigError(
                "poll interval must be at least 1 second".to_string(),
            ));
        }
        let convergence = ConvergenceOptions {
            poll_interval: Duration::from_secs(poll_interval),
            timeout: Duration::from_secs(
                overrides.timeout_secs.unwrap_or(settings.convergence.timeout_secs),
            ),
        };

        let retries = overrides.health_retries.unwrap_or(settings.health.retries);
        if retries == 0 {
            return Err(ControllerError::ConfigError(
                "health retries must be at least 1".to_string(),
            ));
        }
        let url_template = overrides.health_url.unwrap_or(settings.health.url_template);
        // fail early on a template no stack name can fix
        health_url(&url_template, "stack")?;
        let health = HealthOptions {
            url_template,
            settle_delay: Duration::from_secs(
                overrides.settle_delay_secs.unwrap_or(settings.health.settle_delay_secs),
            ),
            retries,
            backoff: Duration::from_secs(
                overrides.health_backoff_secs.unwrap_or(settings.health.backoff_secs),
            ),
            request_timeout: Duration::from_secs(settings.health.request_timeout_secs.max(1)),
        };

        Ok(Self {
            layout,
            log,
            swarm,
            query_retry,
            controller: ControllerOptions {
                convergence,
                health,
                tags: settings.notify.tags,
            },
            notify: NotifyOptions {
                webhook_url: settings.notify.webhook_url,
                token: settings.notify.token,
            },
        })
    }
}
