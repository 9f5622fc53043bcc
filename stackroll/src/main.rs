//! stackroll - Entry Point
//!
//! Deploys a stack to a Docker Swarm, waits for convergence, verifies
//! health, and rolls back to the previous images when either fails.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use stackroll::app::options::{AppOptions, Overrides};
use stackroll::app::run::{run, Command, EXIT_INTERNAL};
use stackroll::filesys::file::File;
use stackroll::logs::{init_logging, LogLevel};
use stackroll::schedule::AbortHandle;
use stackroll::storage::layout::StorageLayout;
use stackroll::storage::settings::Settings;
use stackroll::utils::version_info;

#[derive(Parser)]
#[command(name = "stackroll")]
#[command(about = "Stack rollout controller with automatic rollback", long_about = None)]
#[command(version = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("STACKROLL_GIT_HASH"),
    ", built ",
    env!("STACKROLL_BUILD_TIME"),
    ")"
))]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding attempt records and locks
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// trace, debug, info, warn or error
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Seconds between convergence polls
    #[arg(long, global = true)]
    poll_interval: Option<u64>,

    /// Convergence timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Maximum number of health probes
    #[arg(long, global = true)]
    health_retries: Option<u32>,

    /// Seconds between health probes
    #[arg(long, global = true)]
    health_backoff: Option<u64>,

    /// Seconds to wait after convergence before probing
    #[arg(long, global = true)]
    settle_delay: Option<u64>,

    /// Health URL template, `{stack}` is replaced by the stack name
    #[arg(long, global = true)]
    health_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a stack and roll back automatically on failure
    Deploy {
        /// Stack name
        stack: String,

        /// Compose-format stack file
        spec_file: PathBuf,
    },

    /// Restore the images recorded before the latest deploy
    Rollback {
        /// Stack name
        stack: String,

        /// Break a lock left behind by an interrupted run
        #[arg(short, long)]
        force: bool,
    },

    /// Show the latest attempt for a stack
    Status {
        /// Stack name
        stack: String,

        /// Also query the orchestrator for current service state
        #[arg(short, long)]
        live: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (options, command) = match prepare(cli).await {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("stackroll: {:#}", e);
            std::process::exit(EXIT_INTERNAL);
        }
    };

    // Initialize logging
    let log_guard = match init_logging(options.log.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let abort = AbortHandle::new();
    let signal = abort.signal();
    tokio::spawn(async move {
        await_shutdown_signal().await;
        abort.abort();
    });

    info!("stackroll {}", version_info());
    let code = run(command, options, signal).await;
    // exit skips destructors; flush buffered log lines first
    drop(log_guard);
    std::process::exit(code);
}

/// Read settings, apply flags, and pick the command
async fn prepare(cli: Cli) -> anyhow::Result<(AppOptions, Command)> {
    let settings_file = match &cli.config {
        Some(path) => File::new(path.clone()),
        None => StorageLayout::default_settings_file(),
    };
    let settings = Settings::load(&settings_file)
        .await
        .with_context(|| format!("loading {}", settings_file.path().display()))?;

    let overrides = Overrides {
        state_dir: cli.state_dir,
        log_level: cli.log_level,
        json_logs: cli.json_logs,
        poll_interval_secs: cli.poll_interval,
        timeout_secs: cli.timeout,
        health_retries: cli.health_retries,
        health_backoff_secs: cli.health_backoff,
        settle_delay_secs: cli.settle_delay,
        health_url: cli.health_url,
    };
    let options = AppOptions::resolve(settings, overrides).context("invalid options")?;

    let command = match cli.command {
        Commands::Deploy { stack, spec_file } => Command::Deploy { stack, spec_file },
        Commands::Rollback { stack, force } => Command::Rollback { stack, force },
        Commands::Status { stack, live } => Command::Status { stack, live },
    };
    Ok((options, command))
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    warn!("Unable to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    info!("Ctrl+C received, aborting...");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, aborting...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, aborting...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            warn!("Unable to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received, aborting...");
    }
}
