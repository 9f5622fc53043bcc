//! Command execution

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::app::options::AppOptions;
use crate::app::report::{print_attempt, print_status};
use crate::deploy::cluster::Cluster;
use crate::deploy::controller::Controller;
use crate::deploy::health::HttpProbe;
use crate::errors::ControllerError;
use crate::filesys::file::File;
use crate::http::client::HttpClient;
use crate::models::attempt::Phase;
use crate::notify::{NoopNotifier, Notifier, WebhookNotifier};
use crate::orchestrator::swarm::DockerSwarm;
use crate::schedule::{AbortSignal, TokioScheduler};
use crate::storage::attempts::AttemptStore;

/// Exit code for errors that stop the controller itself
pub const EXIT_INTERNAL: i32 = 1;

/// Exit code for a stack name that cannot be used, same as a rejected stack file
pub const EXIT_INVALID_STACK: i32 = 2;

/// Exit code when another attempt holds the stack lock
pub const EXIT_LOCKED: i32 = 7;

/// Exit code when no attempt is recorded for the stack
pub const EXIT_NO_ATTEMPT: i32 = 8;

/// Commands the binary can run
#[derive(Debug, Clone)]
pub enum Command {
    Deploy { stack: String, spec_file: PathBuf },
    Rollback { stack: String, force: bool },
    Status { stack: String, live: bool },
}

/// Run a command to completion and return the process exit code
pub async fn run(command: Command, options: AppOptions, abort: AbortSignal) -> i32 {
    match execute(command, options, abort).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("stackroll: {}", e);
            exit_code_for_error(&e)
        }
    }
}

async fn execute(
    command: Command,
    options: AppOptions,
    abort: AbortSignal,
) -> Result<i32, ControllerError> {
    let controller = build_controller(options)?;

    match command {
        Command::Deploy { stack, spec_file } => {
            info!("Deploying stack '{}' from {}", stack, spec_file.display());
            let attempt = controller
                .deploy_file(&stack, &File::new(spec_file), &abort)
                .await?;
            print_attempt(&attempt);
            Ok(attempt.phase().exit_code())
        }
        Command::Rollback { stack, force } => {
            let attempt = controller.rollback(&stack, force).await?;
            print_attempt(&attempt);
            Ok(match attempt.phase() {
                Phase::RolledBack => 0,
                phase => phase.exit_code(),
            })
        }
        Command::Status { stack, live } => {
            let status = controller.status(&stack, live).await?;
            print_status(&status);
            Ok(status.attempt.phase().exit_code())
        }
    }
}

fn build_controller(options: AppOptions) -> Result<Controller, ControllerError> {
    let scheduler = Arc::new(TokioScheduler);
    let cluster = Cluster::new(
        Arc::new(DockerSwarm::new(options.swarm)),
        scheduler,
        options.query_retry,
    );

    let http_client = HttpClient::new(options.controller.health.request_timeout)?;
    let probe = Arc::new(HttpProbe::new(http_client.clone()));

    let notifier: Arc<dyn Notifier> = match options.notify.webhook_url {
        Some(url) => {
            info!("Sending annotations to {}", url);
            Arc::new(WebhookNotifier::new(http_client, url, options.notify.token))
        }
        None => Arc::new(NoopNotifier),
    };

    Ok(Controller::new(
        cluster,
        probe,
        notifier,
        AttemptStore::new(options.layout.attempts_dir()),
        options.layout.locks_dir(),
        options.controller,
    ))
}

/// Exit code for a command that failed before producing an attempt
pub fn exit_code_for_error(err: &ControllerError) -> i32 {
    match err {
        ControllerError::InvalidStackName(_) => EXIT_INVALID_STACK,
        ControllerError::AttemptInProgress { .. } => EXIT_LOCKED,
        ControllerError::NoAttempt(_) => EXIT_NO_ATTEMPT,
        _ => EXIT_INTERNAL,
    }
}
