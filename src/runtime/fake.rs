//! In-memory runtime used by unit tests.
//!
//! Records every call in order and models just enough cluster behaviour
//! (object name uniqueness, stack services, volumes) for the components'
//! idempotency and sequencing to be asserted.

use super::{ClusterRuntime, ImageRuntime};
use crate::types::{
    ClusterState, ObjectKind, ObjectRef, ServiceMode, ServiceStatus, TaskStatus,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ClusterState,
    InitCluster,
    ListObjects(ObjectKind),
    CreateObject(ObjectKind, String),
    RemoveObject(ObjectKind, String),
    DeployStack {
        stack: String,
        manifest: String,
        with_registry_auth: bool,
    },
    RemoveStack(String),
    RemoveStackNetworks(String),
    ListStackServices(String),
    ListServiceTasks(String),
    ListStackVolumes(String),
    RemoveVolume(String),
    Build(String),
    Login(String, String, bool),
    Tag(String, String),
    Push(String),
}

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub id: String,
    pub name: String,
    pub payload: Vec<u8>,
    pub labels: HashMap<String, String>,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    active: bool,
    init_fails: bool,
    next_id: u64,
    objects: HashMap<ObjectKind, Vec<StoredObject>>,
    services: Vec<ServiceStatus>,
    tasks: HashMap<String, Vec<TaskStatus>>,
    volumes: Vec<String>,
    /// Operation names (e.g. "build:api:latest", "push:ref") that fail.
    failing: HashSet<String>,
    /// Services reported once a stack is deployed.
    services_on_deploy: Vec<ServiceStatus>,
    /// Number of listings after removal that still show services.
    lingering_lists: usize,
    manifests: Vec<String>,
}

#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        let fake = Self::new();
        fake.state.lock().unwrap().active = true;
        fake
    }

    pub fn fail_init(&self) {
        self.state.lock().unwrap().init_fails = true;
    }

    pub fn fail(&self, operation: &str) {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(operation.to_string());
    }

    pub fn with_services(&self, services: Vec<ServiceStatus>) {
        self.state.lock().unwrap().services = services;
    }

    pub fn with_tasks(&self, service_id: &str, tasks: Vec<TaskStatus>) {
        self.state
            .lock()
            .unwrap()
            .tasks
            .insert(service_id.to_string(), tasks);
    }

    pub fn on_deploy(&self, services: Vec<ServiceStatus>) {
        self.state.lock().unwrap().services_on_deploy = services;
    }

    pub fn linger_after_removal(&self, lists: usize) {
        self.state.lock().unwrap().lingering_lists = lists;
    }

    pub fn with_volumes(&self, volumes: &[&str]) {
        self.state.lock().unwrap().volumes = volumes.iter().map(|v| v.to_string()).collect();
    }

    pub fn seed_object(&self, kind: ObjectKind, name: &str, payload: &[u8], labels: &[(&str, &str)]) {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("seed{}", state.next_id);
        state.objects.entry(kind).or_default().push(StoredObject {
            id,
            name: name.to_string(),
            payload: payload.to_vec(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn objects(&self, kind: ObjectKind) -> Vec<StoredObject> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Manifest contents as they were at submission time.
    pub fn submitted_manifests(&self) -> Vec<String> {
        self.state.lock().unwrap().manifests.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().unwrap().active
    }

    pub fn volumes(&self) -> Vec<String> {
        self.state.lock().unwrap().volumes.clone()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn check(&self, operation: &str) -> Result<()> {
        if self.state.lock().unwrap().failing.contains(operation) {
            Err(anyhow!("injected failure: {}", operation))
        } else {
            Ok(())
        }
    }
}

pub fn service(id: &str, name: &str, running: u64, desired: u64) -> ServiceStatus {
    ServiceStatus {
        id: id.to_string(),
        name: name.to_string(),
        image: Some(format!("{}:latest", name)),
        mode: ServiceMode::Replicated,
        running,
        desired,
    }
}

#[async_trait]
impl ClusterRuntime for FakeRuntime {
    async fn cluster_state(&self) -> Result<ClusterState> {
        self.record(Call::ClusterState);
        Ok(if self.is_active() {
            ClusterState::Active
        } else {
            ClusterState::Uninitialized
        })
    }

    async fn init_cluster(&self, _advertise_addr: Option<&str>) -> Result<()> {
        self.record(Call::InitCluster);
        let mut state = self.state.lock().unwrap();
        if state.init_fails {
            return Err(anyhow!("could not choose an IP address to advertise"));
        }
        state.active = true;
        Ok(())
    }

    async fn list_objects(&self, kind: ObjectKind) -> Result<Vec<ObjectRef>> {
        self.record(Call::ListObjects(kind));
        self.check(&format!("list:{}", kind))?;
        Ok(self
            .objects(kind)
            .into_iter()
            .map(|o| ObjectRef {
                id: o.id,
                name: o.name,
                labels: o.labels,
            })
            .collect())
    }

    async fn create_object(
        &self,
        kind: ObjectKind,
        name: &str,
        payload: &[u8],
        labels: HashMap<String, String>,
    ) -> Result<String> {
        self.record(Call::CreateObject(kind, name.to_string()));
        self.check(&format!("create:{}:{}", kind, name))?;
        let mut state = self.state.lock().unwrap();
        let objects = state.objects.entry(kind).or_default();
        if objects.iter().any(|o| o.name == name) {
            return Err(anyhow!("rpc error: code = AlreadyExists desc = {} exists", name));
        }
        state.next_id += 1;
        let id = format!("obj{}", state.next_id);
        state.objects.entry(kind).or_default().push(StoredObject {
            id: id.clone(),
            name: name.to_string(),
            payload: payload.to_vec(),
            labels,
        });
        Ok(id)
    }

    async fn remove_object(&self, kind: ObjectKind, id: &str) -> Result<()> {
        self.record(Call::RemoveObject(kind, id.to_string()));
        self.check(&format!("remove:{}", kind))?;
        let mut state = self.state.lock().unwrap();
        let objects = state.objects.entry(kind).or_default();
        let before = objects.len();
        objects.retain(|o| o.id != id);
        if objects.len() == before {
            return Err(anyhow!("{} {} not found", kind, id));
        }
        Ok(())
    }

    async fn deploy_stack(
        &self,
        stack: &str,
        manifest: &Path,
        with_registry_auth: bool,
    ) -> Result<()> {
        self.record(Call::DeployStack {
            stack: stack.to_string(),
            manifest: manifest.display().to_string(),
            with_registry_auth,
        });
        let contents = std::fs::read_to_string(manifest)?;
        self.check("deploy")?;
        let mut state = self.state.lock().unwrap();
        state.manifests.push(contents);
        state.services = state.services_on_deploy.clone();
        Ok(())
    }

    async fn remove_stack(&self, stack: &str) -> Result<()> {
        self.record(Call::RemoveStack(stack.to_string()));
        self.check("remove_stack")?;
        let mut state = self.state.lock().unwrap();
        if state.lingering_lists == 0 {
            state.services.clear();
        }
        Ok(())
    }

    async fn remove_stack_networks(&self, stack: &str) -> Result<()> {
        self.record(Call::RemoveStackNetworks(stack.to_string()));
        Ok(())
    }

    async fn list_stack_services(&self, stack: &str) -> Result<Vec<ServiceStatus>> {
        self.record(Call::ListStackServices(stack.to_string()));
        self.check("list_services")?;
        let mut state = self.state.lock().unwrap();
        let services = state.services.clone();
        if state.lingering_lists > 0 && state.calls.contains(&Call::RemoveStack(stack.to_string()))
        {
            state.lingering_lists -= 1;
            if state.lingering_lists == 0 {
                state.services.clear();
            }
        }
        Ok(services)
    }

    async fn list_service_tasks(&self, service_id: &str) -> Result<Vec<TaskStatus>> {
        self.record(Call::ListServiceTasks(service_id.to_string()));
        Ok(self
            .state
            .lock()
            .unwrap()
            .tasks
            .get(service_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_stack_volumes(&self, stack: &str) -> Result<Vec<String>> {
        self.record(Call::ListStackVolumes(stack.to_string()));
        Ok(self.volumes())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.record(Call::RemoveVolume(name.to_string()));
        self.state.lock().unwrap().volumes.retain(|v| v != name);
        Ok(())
    }
}

#[async_trait]
impl ImageRuntime for FakeRuntime {
    async fn build(&self, reference: &str, _dockerfile: &Path, _context: &Path) -> Result<()> {
        self.record(Call::Build(reference.to_string()));
        self.check(&format!("build:{}", reference))
    }

    async fn login(&self, registry: &str, username: &str, password: Option<&str>) -> Result<()> {
        self.record(Call::Login(
            registry.to_string(),
            username.to_string(),
            password.is_some(),
        ));
        self.check("login")
    }

    async fn tag(&self, source: &str, target: &str) -> Result<()> {
        self.record(Call::Tag(source.to_string(), target.to_string()));
        self.check(&format!("tag:{}", target))
    }

    async fn push(&self, reference: &str) -> Result<()> {
        self.record(Call::Push(reference.to_string()));
        self.check(&format!("push:{}", reference))
    }
}
