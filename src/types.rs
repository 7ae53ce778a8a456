//! Data structures shared between the orchestrator components.
//!
//! None of these are persisted locally.  They are snapshots of what the
//! cluster reported on the most recent query, or descriptions of desired
//! state derived from files on disk.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Images are always built and published under this tag.
pub const IMAGE_TAG: &str = "latest";

/// Label Docker attaches to every object created by `docker stack deploy`.
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";

/// Label carrying the SHA-256 of a secret or config payload.
pub const DIGEST_LABEL: &str = "com.stackpilot.digest";

/// Swarm membership of the local node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterState {
    Uninitialized,
    Active,
    /// Pending, locked or errored; neither usable nor safe to re-initialize.
    Unavailable(String),
}

/// The two kinds of named, immutable cluster objects we manage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Secret,
    Config,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectKind::Secret => f.write_str("secret"),
            ObjectKind::Config => f.write_str("config"),
        }
    }
}

/// A secret or config as listed by the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub id: String,
    pub name: String,
    pub labels: HashMap<String, String>,
}

/// A container image built from a local context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSpec {
    pub name: String,
    pub context: PathBuf,
    pub dockerfile: PathBuf,
}

impl ImageSpec {
    /// Local reference, e.g. `insurance-api:latest`.
    pub fn local_ref(&self) -> String {
        format!("{}:{}", self.name, IMAGE_TAG)
    }
}

/// Registry account that images are published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTarget {
    pub registry: String,
    pub username: String,
    /// Registry host that is implied when omitted from a reference.
    pub default_registry: String,
}

impl RegistryTarget {
    /// Returns a target only when both registry and username are non-empty.
    pub fn from_parts(
        registry: Option<&str>,
        username: Option<&str>,
        default_registry: &str,
    ) -> Option<Self> {
        let registry = registry.map(str::trim).filter(|s| !s.is_empty())?;
        let username = username.map(str::trim).filter(|s| !s.is_empty())?;
        Some(Self {
            registry: registry.to_string(),
            username: username.to_string(),
            default_registry: default_registry.to_string(),
        })
    }

    fn is_default_registry(&self) -> bool {
        self.registry.eq_ignore_ascii_case(&self.default_registry)
            || (self.default_registry == "docker.io"
                && self.registry.eq_ignore_ascii_case("index.docker.io"))
    }

    /// Registry-qualified reference for a locally built image.
    pub fn qualify(&self, image: &str) -> String {
        if self.is_default_registry() {
            format!("{}/{}:{}", self.username, image, IMAGE_TAG)
        } else {
            format!("{}/{}/{}:{}", self.registry, self.username, image, IMAGE_TAG)
        }
    }
}

/// How a service is scheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    Replicated,
    Global,
}

/// A stack service and its task counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub id: String,
    pub name: String,
    pub image: Option<String>,
    pub mode: ServiceMode,
    pub running: u64,
    pub desired: u64,
}

impl ServiceStatus {
    /// A service scaled to zero, or a global service with no eligible
    /// node, is converged with nothing running.
    pub fn is_converged(&self) -> bool {
        self.running >= self.desired
    }
}

/// One scheduled task of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStatus {
    pub id: String,
    pub slot: Option<u64>,
    pub node: Option<String>,
    pub desired_state: String,
    pub state: String,
    pub message: Option<String>,
    pub error: Option<String>,
}

/// Lifecycle of a deployed stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StackPhase {
    Absent,
    Deploying,
    Running,
    Removing,
}

impl StackPhase {
    /// Derives the phase from the services the cluster reports.
    ///
    /// `Removing` is never observed; it only exists while a teardown is
    /// in progress.
    pub fn observe(services: &[ServiceStatus]) -> Self {
        if services.is_empty() {
            StackPhase::Absent
        } else if services.iter().all(ServiceStatus::is_converged) {
            StackPhase::Running
        } else {
            StackPhase::Deploying
        }
    }
}

impl fmt::Display for StackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StackPhase::Absent => "absent",
            StackPhase::Deploying => "deploying",
            StackPhase::Running => "running",
            StackPhase::Removing => "removing",
        };
        f.write_str(s)
    }
}
