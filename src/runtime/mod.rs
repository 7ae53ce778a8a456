use crate::types::{ClusterState, ObjectKind, ObjectRef, ServiceStatus, TaskStatus};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;

pub mod cli;
pub mod docker;
#[cfg(test)]
pub mod fake;

pub use cli::DockerCli;
pub use docker::DockerRuntime;

/// Control plane of the container cluster.
///
/// Every call is a fresh round-trip; implementations must not cache
/// cluster state between calls.
#[async_trait]
pub trait ClusterRuntime: Send + Sync {
    async fn cluster_state(&self) -> Result<ClusterState>;

    /// Initializes a single-node cluster with this node as manager.
    async fn init_cluster(&self, advertise_addr: Option<&str>) -> Result<()>;

    async fn list_objects(&self, kind: ObjectKind) -> Result<Vec<ObjectRef>>;

    /// Creates a named object and returns its id.
    async fn create_object(
        &self,
        kind: ObjectKind,
        name: &str,
        payload: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<String>;

    async fn remove_object(&self, kind: ObjectKind, id: &str) -> Result<()>;

    /// Submits a manifest as the named stack.
    async fn deploy_stack(&self, stack: &str, manifest: &Path, with_registry_auth: bool)
        -> Result<()>;

    /// Requests removal of every service in the stack.
    async fn remove_stack(&self, stack: &str) -> Result<()>;

    async fn remove_stack_networks(&self, stack: &str) -> Result<()>;

    async fn list_stack_services(&self, stack: &str) -> Result<Vec<ServiceStatus>>;

    async fn list_service_tasks(&self, service_id: &str) -> Result<Vec<TaskStatus>>;

    async fn list_stack_volumes(&self, stack: &str) -> Result<Vec<String>>;

    async fn remove_volume(&self, name: &str) -> Result<()>;
}

/// Local image builder and registry client.
#[async_trait]
pub trait ImageRuntime: Send + Sync {
    /// Builds `dockerfile` in `context` and tags the result as `reference`.
    async fn build(&self, reference: &str, dockerfile: &Path, context: &Path) -> Result<()>;

    /// Authenticates against `registry`; prompts interactively when no
    /// password is supplied.
    async fn login(&self, registry: &str, username: &str, password: Option<&str>) -> Result<()>;

    async fn tag(&self, source: &str, target: &str) -> Result<()>;

    async fn push(&self, reference: &str) -> Result<()>;
}
