//! Stack specification models

use serde::{Deserialize, Serialize};

/// A validated stack specification.
///
/// Built only by the loader; there is no way to mutate it after validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSpec {
    /// Stack name
    name: String,

    /// Services in document order
    services: Vec<ServiceDef>,

    /// Original source text, submitted verbatim to the orchestrator
    source: String,

    /// SHA-256 of the source text
    digest: String,
}

impl StackSpec {
    pub(crate) fn new(name: String, services: Vec<ServiceDef>, source: String, digest: String) -> Self {
        Self {
            name,
            services,
            source,
            digest,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn services(&self) -> &[ServiceDef] {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDef> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn service_names(&self) -> Vec<String> {
        self.services.iter().map(|s| s.name.clone()).collect()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

/// One service definition within a stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDef {
    /// Service name (unqualified, without the stack prefix)
    pub name: String,

    /// Image reference
    pub image: String,

    /// Replica mode and desired count
    pub mode: ReplicaMode,

    /// Exposed ports
    #[serde(default)]
    pub ports: Vec<PortMapping>,
}

impl ServiceDef {
    /// Desired replicas when known statically (replicated mode)
    pub fn desired_replicas(&self) -> Option<u32> {
        match self.mode {
            ReplicaMode::Replicated(n) => Some(n),
            ReplicaMode::Global => None,
        }
    }
}

/// How replicas are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaMode {
    /// Fixed number of replicas
    Replicated(u32),

    /// One replica per eligible node
    Global,
}

/// Transport protocol of an exposed port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

/// An exposed port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Container port
    pub target: u16,

    /// Published (ingress) port, if any
    pub published: Option<u16>,

    pub protocol: Protocol,
}
