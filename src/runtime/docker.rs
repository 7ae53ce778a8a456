use super::{ClusterRuntime, DockerCli};
use crate::types::{
    ClusterState, ObjectKind, ObjectRef, ServiceMode, ServiceStatus, TaskStatus,
    STACK_NAMESPACE_LABEL,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bollard::models::{SecretSpec, Service, Task};
use bollard::network::ListNetworksOptions;
use bollard::node::ListNodesOptions;
use bollard::secret::ListSecretsOptions;
use bollard::service::ListServicesOptions;
use bollard::swarm::InitSwarmOptions;
use bollard::task::ListTasksOptions;
use bollard::volume::{ListVolumesOptions, RemoveVolumeOptions};
use bollard::Docker;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

pub struct DockerRuntime {
    docker: Docker,
    cli: DockerCli,
}

impl DockerRuntime {
    pub fn connect(cli: DockerCli) -> Result<Self> {
        // Honours DOCKER_HOST, otherwise the local unix socket.
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to the Docker daemon")?;
        Ok(Self { docker, cli })
    }

    /// Resolves node ids to hostnames for task placement output.
    async fn node_names(&self) -> Result<HashMap<String, String>> {
        let nodes = self
            .docker
            .list_nodes(None::<ListNodesOptions<String>>)
            .await?;
        Ok(nodes
            .into_iter()
            .filter_map(|n| {
                let id = n.id?;
                let host = n.description.and_then(|d| d.hostname)?;
                Some((id, host))
            })
            .collect())
    }
}

fn filter(key: &str, value: &str) -> HashMap<String, Vec<String>> {
    HashMap::from([(key.to_string(), vec![value.to_string()])])
}

fn stack_filter(stack: &str) -> HashMap<String, Vec<String>> {
    filter("label", &format!("{}={}", STACK_NAMESPACE_LABEL, stack))
}

/// Maps a listed service onto its status snapshot.  Services without an
/// id are skipped.
fn service_status(service: Service) -> Option<ServiceStatus> {
    let id = service.id?;
    let spec = service.spec.unwrap_or_default();
    let name = spec.name.unwrap_or_else(|| id.clone());
    let image = spec
        .task_template
        .and_then(|t| t.container_spec)
        .and_then(|c| c.image)
        // Drop the digest the cluster pins after resolving a tag.
        .map(|i| i.split('@').next().unwrap_or_default().to_string());
    let mode = match spec.mode.and_then(|m| m.global) {
        Some(_) => ServiceMode::Global,
        None => ServiceMode::Replicated,
    };
    let counts = service.service_status.unwrap_or_default();
    Some(ServiceStatus {
        id,
        name,
        image,
        mode,
        running: counts.running_tasks.unwrap_or_default() as u64,
        desired: counts.desired_tasks.unwrap_or_default() as u64,
    })
}

/// Maps a listed task, naming its node by hostname when `nodes` knows it.
fn task_status(task: Task, nodes: &HashMap<String, String>) -> Option<TaskStatus> {
    let id = task.id?;
    let status = task.status.unwrap_or_default();
    let node = task
        .node_id
        .map(|n| nodes.get(&n).cloned().unwrap_or(n));
    Some(TaskStatus {
        id,
        slot: task.slot.map(|s| s as u64),
        node,
        desired_state: task
            .desired_state
            .and_then(|s| wire_name(&s))
            .unwrap_or_default(),
        state: status
            .state
            .and_then(|s| wire_name(&s))
            .unwrap_or_default(),
        message: status.message.filter(|m| !m.is_empty()),
        error: status.err.filter(|e| !e.is_empty()),
    })
}

/// Renders a bollard enum as the lowercase string the Engine API uses.
fn wire_name<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
}

#[async_trait]
impl ClusterRuntime for DockerRuntime {
    async fn cluster_state(&self) -> Result<ClusterState> {
        let info = self.docker.info().await?;
        let state = info
            .swarm
            .and_then(|s| s.local_node_state)
            .and_then(|s| wire_name(&s))
            .unwrap_or_default();
        debug!("Local swarm node state: {:?}", state);
        Ok(match state.as_str() {
            "active" => ClusterState::Active,
            "" | "inactive" => ClusterState::Uninitialized,
            other => ClusterState::Unavailable(other.to_string()),
        })
    }

    async fn init_cluster(&self, advertise_addr: Option<&str>) -> Result<()> {
        let options = InitSwarmOptions {
            listen_addr: "0.0.0.0:2377".to_string(),
            advertise_addr: advertise_addr.unwrap_or_default().to_string(),
        };
        let node_id = self.docker.init_swarm(options).await?;
        info!("Initialized swarm, manager node {}", node_id);
        Ok(())
    }

    async fn list_objects(&self, kind: ObjectKind) -> Result<Vec<ObjectRef>> {
        let objects = match kind {
            ObjectKind::Secret => self
                .docker
                .list_secrets(None::<ListSecretsOptions<String>>)
                .await?
                .into_iter()
                .filter_map(|s| {
                    let spec = s.spec?;
                    Some(ObjectRef {
                        id: s.id?,
                        name: spec.name?,
                        labels: spec.labels.unwrap_or_default(),
                    })
                })
                .collect(),
            // The Engine API client has no config endpoints.
            ObjectKind::Config => self.cli.config_list().await?,
        };
        Ok(objects)
    }

    async fn create_object(
        &self,
        kind: ObjectKind,
        name: &str,
        payload: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<String> {
        match kind {
            ObjectKind::Secret => {
                // The Engine API expects payloads base64 encoded.
                let response = self
                    .docker
                    .create_secret(SecretSpec {
                        name: Some(name.to_string()),
                        labels: Some(labels),
                        data: Some(BASE64.encode(payload)),
                        ..Default::default()
                    })
                    .await?;
                Ok(response.id)
            }
            ObjectKind::Config => self.cli.config_create(name, payload, &labels).await,
        }
    }

    async fn remove_object(&self, kind: ObjectKind, id: &str) -> Result<()> {
        match kind {
            ObjectKind::Secret => self.docker.delete_secret(id).await?,
            ObjectKind::Config => self.cli.config_remove(id).await?,
        }
        Ok(())
    }

    async fn deploy_stack(
        &self,
        stack: &str,
        manifest: &Path,
        with_registry_auth: bool,
    ) -> Result<()> {
        self.cli
            .stack_deploy(stack, manifest, with_registry_auth)
            .await
    }

    async fn remove_stack(&self, stack: &str) -> Result<()> {
        let services = self
            .docker
            .list_services(Some(ListServicesOptions {
                filters: stack_filter(stack),
                ..Default::default()
            }))
            .await?;
        let mut failures = Vec::new();
        for service in services {
            let Some(id) = service.id else { continue };
            let name = service
                .spec
                .and_then(|s| s.name)
                .unwrap_or_else(|| id.clone());
            info!("Removing service {}", name);
            if let Err(e) = self.docker.delete_service(&id).await {
                warn!("Failed to remove service {}: {}", name, e);
                failures.push(name);
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("failed to remove services: {}", failures.join(", ")))
        }
    }

    async fn remove_stack_networks(&self, stack: &str) -> Result<()> {
        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions {
                filters: stack_filter(stack),
            }))
            .await?;
        for network in networks {
            let Some(id) = network.id else { continue };
            let name = network.name.unwrap_or_else(|| id.clone());
            info!("Removing network {}", name);
            if let Err(e) = self.docker.remove_network(&id).await {
                warn!("Failed to remove network {}: {}", name, e);
            }
        }
        Ok(())
    }

    async fn list_stack_services(&self, stack: &str) -> Result<Vec<ServiceStatus>> {
        let services = self
            .docker
            .list_services(Some(ListServicesOptions {
                filters: stack_filter(stack),
                status: true,
            }))
            .await?;

        let mut result: Vec<ServiceStatus> =
            services.into_iter().filter_map(service_status).collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn list_service_tasks(&self, service_id: &str) -> Result<Vec<TaskStatus>> {
        let tasks = self
            .docker
            .list_tasks(Some(ListTasksOptions {
                filters: filter("service", service_id),
            }))
            .await?;
        let nodes = match self.node_names().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Failed to resolve node names: {}", e);
                HashMap::new()
            }
        };

        let mut result: Vec<TaskStatus> = tasks
            .into_iter()
            .filter_map(|task| task_status(task, &nodes))
            .collect();
        result.sort_by_key(|t| t.slot);
        Ok(result)
    }

    async fn list_stack_volumes(&self, stack: &str) -> Result<Vec<String>> {
        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions {
                filters: stack_filter(stack),
            }))
            .await?;
        let mut names: Vec<String> = response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.name)
            .collect();
        names.sort();
        Ok(names)
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: false }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_filter_matches_namespace_label() {
        let f = stack_filter("insurance");
        assert_eq!(
            f.get("label"),
            Some(&vec!["com.docker.stack.namespace=insurance".to_string()])
        );
    }

    #[test]
    fn wire_name_uses_serialized_form() {
        #[derive(Serialize)]
        #[serde(rename_all = "lowercase")]
        enum State {
            Running,
        }
        assert_eq!(wire_name(&State::Running).as_deref(), Some("running"));
        assert_eq!(wire_name(&3u8), None);
    }

    // Models are built from Engine API JSON, the shape the daemon returns.
    fn engine_service(value: serde_json::Value) -> Service {
        serde_json::from_value(value).unwrap()
    }

    fn engine_task(value: serde_json::Value) -> Task {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn replicated_service_drops_pinned_digest() {
        let service = engine_service(serde_json::json!({
            "ID": "svc1",
            "Spec": {
                "Name": "insurance_api",
                "Mode": {"Replicated": {"Replicas": 2}},
                "TaskTemplate": {
                    "ContainerSpec": {"Image": "alice/insurance-api:latest@sha256:0123abcd"}
                }
            },
            "ServiceStatus": {"RunningTasks": 1, "DesiredTasks": 2}
        }));
        let status = service_status(service).unwrap();
        assert_eq!(status.name, "insurance_api");
        assert_eq!(status.image.as_deref(), Some("alice/insurance-api:latest"));
        assert_eq!(status.mode, ServiceMode::Replicated);
        assert_eq!((status.running, status.desired), (1, 2));
    }

    #[test]
    fn global_service_and_missing_counts() {
        let service = engine_service(serde_json::json!({
            "ID": "svc2",
            "Spec": {"Name": "insurance_proxy", "Mode": {"Global": {}}}
        }));
        let status = service_status(service).unwrap();
        assert_eq!(status.mode, ServiceMode::Global);
        assert_eq!(status.image, None);
        assert_eq!((status.running, status.desired), (0, 0));
    }

    #[test]
    fn service_without_id_is_skipped() {
        let service = engine_service(serde_json::json!({"Spec": {"Name": "orphan"}}));
        assert!(service_status(service).is_none());
    }

    #[test]
    fn task_node_falls_back_to_id() {
        let nodes = HashMap::from([("n1".to_string(), "manager-1".to_string())]);
        let placed = engine_task(serde_json::json!({
            "ID": "t1",
            "Slot": 1,
            "NodeID": "n1",
            "DesiredState": "running",
            "Status": {"State": "running", "Message": "started", "Err": ""}
        }));
        let unknown = engine_task(serde_json::json!({
            "ID": "t2",
            "Slot": 2,
            "NodeID": "n9",
            "DesiredState": "shutdown",
            "Status": {"State": "rejected", "Message": "", "Err": "no such image"}
        }));

        let placed = task_status(placed, &nodes).unwrap();
        assert_eq!(placed.node.as_deref(), Some("manager-1"));
        assert_eq!(placed.slot, Some(1));
        assert_eq!(placed.state, "running");
        assert_eq!(placed.message.as_deref(), Some("started"));
        assert_eq!(placed.error, None);

        let unknown = task_status(unknown, &nodes).unwrap();
        assert_eq!(unknown.node.as_deref(), Some("n9"));
        assert_eq!(unknown.desired_state, "shutdown");
        assert_eq!(unknown.state, "rejected");
        assert_eq!(unknown.message, None);
        assert_eq!(unknown.error.as_deref(), Some("no such image"));
    }
}
