//! StackSpec loader and validator
//!
//! Parses a Compose-format stack document and checks it without contacting
//! the orchestrator. Every problem found is reported; a spec with any issue is
//! rejected as a whole.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::filesys::file::File;
use crate::models::spec::{PortMapping, Protocol, ReplicaMode, ServiceDef, StackSpec};
use crate::utils::sha256_hash;

/// Stack and service names; also keeps stack names usable as path components
pub(crate) static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid name regex"));

// [registry[:port]/]path[:tag][@algorithm:hex]
static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*(?::[0-9]+)?/)?",
        r"[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*",
        r"(?::[A-Za-z0-9_][A-Za-z0-9_.-]{0,127})?",
        r"(?:@[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,})?$",
    ))
    .expect("valid image regex")
});

/// One problem found in a stack document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    /// Dotted path of the offending field
    pub field: String,

    pub message: String,
}

impl std::fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The stack document is malformed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid stack specification: {}", join_issues(.issues))]
pub struct ValidationError {
    pub issues: Vec<FieldIssue>,
}

impl ValidationError {
    fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            issues: vec![FieldIssue {
                field: field.into(),
                message: message.into(),
            }],
        }
    }

    /// Whether any issue names this field
    pub fn names_field(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field)
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Deserialize)]
struct RawStack {
    #[serde(default)]
    services: Option<IndexMap<String, Option<RawService>>>,
}

#[derive(Debug, Default, Deserialize)]
struct RawService {
    #[serde(default)]
    image: Option<String>,

    #[serde(default)]
    deploy: Option<RawDeploy>,

    #[serde(default)]
    ports: Vec<RawPort>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDeploy {
    #[serde(default)]
    replicas: Option<i64>,

    #[serde(default)]
    mode: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(i64),
    Short(String),
    Long {
        target: i64,
        #[serde(default)]
        published: Option<serde_yaml::Value>,
        #[serde(default)]
        protocol: Option<String>,
    },
}

/// Collects issues while walking the document
#[derive(Default)]
struct Issues(Vec<FieldIssue>);

impl Issues {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldIssue {
            field: field.into(),
            message: message.into(),
        });
    }
}

/// Load and validate a stack spec from a file.
///
/// An unreadable file is reported as a validation issue on `<source>`.
pub async fn load_spec_file(stack: &str, file: &File) -> Result<StackSpec, ValidationError> {
    let source = file.read_string().await.map_err(|e| {
        ValidationError::single(
            "<source>",
            format!("unable to read {}: {}", file.path().display(), e),
        )
    })?;
    load_spec(stack, &source)
}

/// Parse and validate a stack spec from its source text
pub fn load_spec(stack: &str, source: &str) -> Result<StackSpec, ValidationError> {
    let mut issues = Issues::default();

    if !NAME_RE.is_match(stack) {
        issues.push("stack", format!("invalid stack name '{}'", stack));
    }

    let raw: RawStack = serde_yaml::from_str(source)
        .map_err(|e| ValidationError::single("<document>", e.to_string()))?;

    let services = match raw.services {
        Some(services) if !services.is_empty() => services,
        _ => {
            issues.push("services", "at least one service is required");
            return Err(ValidationError { issues: issues.0 });
        }
    };

    let mut defs = Vec::with_capacity(services.len());
    for (name, raw_service) in services {
        if let Some(def) = validate_service(&name, raw_service.unwrap_or_default(), &mut issues) {
            defs.push(def);
        }
    }

    if !issues.0.is_empty() {
        return Err(ValidationError { issues: issues.0 });
    }

    debug!("Validated stack '{}' with {} service(s)", stack, defs.len());
    Ok(StackSpec::new(
        stack.to_string(),
        defs,
        source.to_string(),
        sha256_hash(source.as_bytes()),
    ))
}

fn validate_service(name: &str, raw: RawService, issues: &mut Issues) -> Option<ServiceDef> {
    let prefix = format!("services.{}", name);
    let before = issues.0.len();

    if !NAME_RE.is_match(name) {
        issues.push(prefix.clone(), format!("invalid service name '{}'", name));
    }

    let image = raw.image.map(|i| i.trim().to_string()).unwrap_or_default();
    if image.is_empty() {
        issues.push(format!("{}.image", prefix), "image is required");
    } else if let Some(message) = check_image_ref(&image) {
        issues.push(format!("{}.image", prefix), message);
    }

    let deploy = raw.deploy.unwrap_or_default();
    let mode = match deploy.mode.as_deref() {
        None | Some("replicated") => match deploy.replicas {
            None => Some(ReplicaMode::Replicated(1)),
            Some(n) if n < 0 => {
                issues.push(
                    format!("{}.deploy.replicas", prefix),
                    format!("replica count must be non-negative, got {}", n),
                );
                None
            }
            Some(n) => match u32::try_from(n) {
                Ok(n) => Some(ReplicaMode::Replicated(n)),
                Err(_) => {
                    issues.push(
                        format!("{}.deploy.replicas", prefix),
                        format!("replica count {} is too large", n),
                    );
                    None
                }
            },
        },
        Some("global") => {
            if deploy.replicas.is_some() {
                issues.push(
                    format!("{}.deploy.replicas", prefix),
                    "replicas cannot be set for a global service",
                );
            }
            Some(ReplicaMode::Global)
        }
        Some(other) => {
            issues.push(
                format!("{}.deploy.mode", prefix),
                format!("unknown mode '{}', expected 'replicated' or 'global'", other),
            );
            None
        }
    };

    let mut ports = Vec::with_capacity(raw.ports.len());
    for (i, port) in raw.ports.into_iter().enumerate() {
        match parse_port(port) {
            Ok(mapping) => ports.push(mapping),
            Err(message) => issues.push(format!("{}.ports[{}]", prefix, i), message),
        }
    }

    if issues.0.len() > before {
        return None;
    }

    Some(ServiceDef {
        name: name.to_string(),
        image,
        mode: mode?,
        ports,
    })
}

/// Returns a message describing why the reference is invalid
fn check_image_ref(image: &str) -> Option<String> {
    if image.contains("${") || image.contains('$') {
        return Some(format!("unresolved variable in image reference '{}'", image));
    }
    if image.len() > 255 + 128 + 72 {
        return Some("image reference is too long".to_string());
    }
    if !IMAGE_RE.is_match(image) {
        return Some(format!("malformed image reference '{}'", image));
    }
    None
}

fn parse_port(port: RawPort) -> Result<PortMapping, String> {
    match port {
        RawPort::Number(n) => Ok(PortMapping {
            target: port_number(n)?,
            published: None,
            protocol: Protocol::Tcp,
        }),
        RawPort::Short(s) => parse_short_port(&s),
        RawPort::Long {
            target,
            published,
            protocol,
        } => {
            let published = match published {
                None | Some(serde_yaml::Value::Null) => None,
                Some(serde_yaml::Value::Number(n)) => {
                    let n = n.as_i64().ok_or_else(|| format!("invalid published port {}", n))?;
                    Some(port_number(n)?)
                }
                Some(serde_yaml::Value::String(s)) => Some(parse_port_str(&s)?),
                Some(other) => return Err(format!("invalid published port {:?}", other)),
            };
            Ok(PortMapping {
                target: port_number(target)?,
                published,
                protocol: parse_protocol(protocol.as_deref().unwrap_or("tcp"))?,
            })
        }
    }
}

// [host_ip:]published:target[/protocol] or target[/protocol]
fn parse_short_port(s: &str) -> Result<PortMapping, String> {
    let (ports, protocol) = match s.split_once('/') {
        Some((ports, proto)) => (ports, parse_protocol(proto)?),
        None => (s, Protocol::Tcp),
    };

    let mut parts = ports.rsplitn(3, ':');
    let target = parts
        .next()
        .ok_or_else(|| format!("empty port mapping '{}'", s))
        .and_then(parse_port_str)?;
    let published = parts.next().map(parse_port_str).transpose()?;

    Ok(PortMapping {
        target,
        published,
        protocol,
    })
}

fn parse_port_str(s: &str) -> Result<u16, String> {
    if s.contains('-') {
        return Err(format!("port ranges are not supported ('{}')", s));
    }
    let n: i64 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid port '{}'", s))?;
    port_number(n)
}

fn port_number(n: i64) -> Result<u16, String> {
    match u16::try_from(n) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(format!("port {} is out of range 1-65535", n)),
    }
}

fn parse_protocol(s: &str) -> Result<Protocol, String> {
    match s.to_lowercase().as_str() {
        "tcp" => Ok(Protocol::Tcp),
        "udp" => Ok(Protocol::Udp),
        "sctp" => Ok(Protocol::Sctp),
        other => Err(format!("unknown protocol '{}'", other)),
    }
}
