//! Docker Swarm orchestrator client
//!
//! Drives the `docker` CLI and reads its JSON output. Services are named
//! `<stack>_<service>`, the convention `docker stack deploy` uses.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::models::service::ServiceState;
use crate::models::spec::StackSpec;
use crate::orchestrator::{Orchestrator, OrchestratorError};

const MAX_TASK_ERRORS: usize = 10;

/// Swarm client options
#[derive(Debug, Clone)]
pub struct SwarmOptions {
    /// Path or name of the docker binary
    pub docker_bin: String,

    /// Timeout applied to every docker command
    pub command_timeout: Duration,
}

impl Default for SwarmOptions {
    fn default() -> Self {
        Self {
            docker_bin: "docker".to_string(),
            command_timeout: Duration::from_secs(60),
        }
    }
}

/// Orchestrator backed by a Docker Swarm manager
pub struct DockerSwarm {
    options: SwarmOptions,
}

impl DockerSwarm {
    pub fn new(options: SwarmOptions) -> Self {
        Self { options }
    }

    /// Run docker with `args`, optionally feeding `stdin`, and return stdout
    async fn docker(&self, args: &[&str], stdin: Option<&str>) -> Result<String, OrchestratorError> {
        let bin = &self.options.docker_bin;
        debug!("Running {} {}", bin, args.join(" "));

        let mut command = Command::new(bin);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let run = async {
            let mut child = command.spawn()?;
            if let Some(input) = stdin {
                if let Some(mut pipe) = child.stdin.take() {
                    pipe.write_all(input.as_bytes()).await?;
                }
            }
            child.wait_with_output().await
        };

        let output = match tokio::time::timeout(self.options.command_timeout, run).await {
            Err(_) => {
                return Err(OrchestratorError::TimedOut(format!(
                    "{} {} timed out after {:?}",
                    bin,
                    args.first().unwrap_or(&""),
                    self.options.command_timeout
                )));
            }
            Ok(Err(e)) => {
                return Err(OrchestratorError::Unavailable(format!(
                    "failed to run {}: {}",
                    bin, e
                )));
            }
            Ok(Ok(output)) => output,
        };

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    async fn inspect(&self, name: &str) -> Result<InspectedService, OrchestratorError> {
        let stdout = self.docker(&["service", "inspect", name], None).await?;
        parse_inspect(&stdout)
    }
}

fn qualified(stack: &str, service: &str) -> String {
    format!("{}_{}", stack, service)
}

#[async_trait]
impl Orchestrator for DockerSwarm {
    async fn get_service_image(
        &self,
        stack: &str,
        service: &str,
    ) -> Result<Option<String>, OrchestratorError> {
        match self.inspect(&qualified(stack, service)).await {
            Ok(inspected) => Ok(Some(inspected.image)),
            Err(OrchestratorError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn submit_stack(&self, spec: &StackSpec) -> Result<(), OrchestratorError> {
        info!("Submitting stack '{}' ({} services)", spec.name(), spec.services().len());
        self.docker(
            &[
                "stack",
                "deploy",
                "--with-registry-auth",
                "--compose-file",
                "-",
                spec.name(),
            ],
            Some(spec.source()),
        )
        .await?;
        Ok(())
    }

    async fn get_service_state(
        &self,
        stack: &str,
        service: &str,
    ) -> Result<ServiceState, OrchestratorError> {
        let name = qualified(stack, service);
        let inspected = self.inspect(&name).await?;
        let tasks = self
            .docker(
                &["service", "ps", "--no-trunc", "--format", "{{json .}}", &name],
                None,
            )
            .await?;
        let tasks = parse_tasks(&tasks)?;
        Ok(build_state(service, inspected, &tasks))
    }

    async fn update_service_image(
        &self,
        stack: &str,
        service: &str,
        image: &str,
    ) -> Result<(), OrchestratorError> {
        let name = qualified(stack, service);
        info!("Updating {} to image {}", name, image);
        self.docker(
            &[
                "service",
                "update",
                "--detach",
                "--with-registry-auth",
                "--image",
                image,
                &name,
            ],
            None,
        )
        .await?;
        Ok(())
    }
}

fn classify_failure(stderr: &str) -> OrchestratorError {
    let message = stderr.trim().to_string();
    let lower = message.to_lowercase();

    const UNAVAILABLE: [&str; 5] = [
        "cannot connect to the docker daemon",
        "error during connect",
        "connection refused",
        "i/o timeout",
        "is the docker daemon running",
    ];

    if UNAVAILABLE.iter().any(|needle| lower.contains(needle)) {
        OrchestratorError::Unavailable(message)
    } else if lower.contains("no such service") {
        OrchestratorError::NotFound(message)
    } else {
        OrchestratorError::Rejected(message)
    }
}

/// The parts of `docker service inspect` the controller reads
#[derive(Debug, Clone, PartialEq, Eq)]
struct InspectedService {
    image: String,
    replicas: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInspect {
    spec: RawInspectSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInspectSpec {
    #[serde(default)]
    mode: RawMode,
    task_template: RawTaskTemplate,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawMode {
    #[serde(default)]
    replicated: Option<RawReplicated>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawReplicated {
    #[serde(default)]
    replicas: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTaskTemplate {
    container_spec: RawContainerSpec,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawContainerSpec {
    image: String,
}

fn parse_inspect(stdout: &str) -> Result<InspectedService, OrchestratorError> {
    let services: Vec<RawInspect> = serde_json::from_str(stdout.trim())
        .map_err(|e| OrchestratorError::Malformed(format!("service inspect: {}", e)))?;
    let service = services
        .into_iter()
        .next()
        .ok_or_else(|| OrchestratorError::Malformed("service inspect returned no entries".to_string()))?;

    Ok(InspectedService {
        image: service.spec.task_template.container_spec.image,
        replicas: service.spec.mode.replicated.map(|r| r.replicas),
    })
}

/// One line of `docker service ps --format '{{json .}}'`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TaskLine {
    #[serde(default)]
    name: String,
    #[serde(default)]
    desired_state: String,
    #[serde(default)]
    current_state: String,
    #[serde(default)]
    error: String,
}

impl TaskLine {
    fn wants_running(&self) -> bool {
        self.desired_state.eq_ignore_ascii_case("running")
    }

    fn is_running(&self) -> bool {
        self.wants_running() && self.current_state.to_lowercase().starts_with("running")
    }
}

fn parse_tasks(stdout: &str) -> Result<Vec<TaskLine>, OrchestratorError> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| OrchestratorError::Malformed(format!("service ps: {}", e)))
        })
        .collect()
}

fn build_state(service: &str, inspected: InspectedService, tasks: &[TaskLine]) -> ServiceState {
    // global services: one wanted task per eligible node
    let desired = inspected
        .replicas
        .unwrap_or_else(|| tasks.iter().filter(|t| t.wants_running()).count() as u32);
    let current = tasks.iter().filter(|t| t.is_running()).count() as u32;

    let mut task_errors: Vec<String> = Vec::new();
    for task in tasks.iter().filter(|t| !t.error.is_empty() && !t.is_running()) {
        let message = format!("{}: {} ({})", task.name, task.error, task.current_state);
        if !task_errors.iter().any(|seen| seen.contains(&task.error)) {
            task_errors.push(message);
        }
        if task_errors.len() >= MAX_TASK_ERRORS {
            break;
        }
    }

    ServiceState {
        service: service.to_string(),
        desired,
        current,
        image: Some(inspected.image),
        task_errors,
    }
}
