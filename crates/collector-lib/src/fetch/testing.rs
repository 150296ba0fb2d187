//! In-memory sources for exercising the fetch round and the engine

use super::{async_trait, NodeAgentFactory, ResourceSource};
use crate::error::SourceError;
use crate::models::{ResourceType, SourceKind};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CONTROL_PLANE_TYPES: &[ResourceType] = &[
    ResourceType::Node,
    ResourceType::Pod,
    ResourceType::Service,
    ResourceType::ReplicationController,
];

const AGENT_TYPES: &[ResourceType] = &[
    ResourceType::Container,
    ResourceType::Image,
    ResourceType::Process,
];

/// A source whose records, failure and latency are set by the test
pub struct FakeSource {
    id: String,
    kind: SourceKind,
    records: Mutex<HashMap<ResourceType, Vec<Value>>>,
    failure: Mutex<Option<SourceError>>,
    delay: Mutex<Option<Duration>>,
    panics: Mutex<bool>,
}

impl FakeSource {
    pub fn control_plane() -> Self {
        Self::new("control-plane", SourceKind::ControlPlane)
    }

    pub fn agent(node: &str) -> Self {
        Self::new(&format!("agent:{node}"), SourceKind::NodeAgent)
    }

    fn new(id: &str, kind: SourceKind) -> Self {
        Self {
            id: id.to_string(),
            kind,
            records: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            delay: Mutex::new(None),
            panics: Mutex::new(false),
        }
    }

    pub fn set(&self, kind: ResourceType, records: Vec<Value>) {
        self.records.lock().unwrap().insert(kind, records);
    }

    pub fn fail_with(&self, error: SourceError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
        *self.delay.lock().unwrap() = None;
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Make every `list` call panic
    pub fn panic_on_list(&self) {
        *self.panics.lock().unwrap() = true;
    }
}

#[async_trait]
impl ResourceSource for FakeSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn resource_types(&self) -> &[ResourceType] {
        match self.kind {
            SourceKind::ControlPlane => CONTROL_PLANE_TYPES,
            SourceKind::NodeAgent => AGENT_TYPES,
        }
    }

    async fn list(&self, kind: ResourceType) -> Result<Vec<Value>, SourceError> {
        let panics = *self.panics.lock().unwrap();
        if panics {
            panic!("{} crashed while listing {kind}", self.id);
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default())
    }
}

/// Hands out one [`FakeSource`] per node name
#[derive(Default)]
pub struct FakeAgents {
    agents: Mutex<HashMap<String, Arc<FakeSource>>>,
    refused: Mutex<Vec<String>>,
}

impl FakeAgents {
    /// The agent for `node`, created on first use
    pub fn source(&self, node: &str) -> Arc<FakeSource> {
        self.agents
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_insert_with(|| Arc::new(FakeSource::agent(node)))
            .clone()
    }

    /// Make building the agent for `node` fail
    pub fn refuse(&self, node: &str) {
        self.refused.lock().unwrap().push(node.to_string());
    }
}

impl NodeAgentFactory for FakeAgents {
    fn agent(&self, node: &str) -> Result<Arc<dyn ResourceSource>, SourceError> {
        if self.refused.lock().unwrap().iter().any(|n| n == node) {
            return Err(SourceError::InvalidResponse(format!("no agent for {node}")));
        }
        Ok(self.source(node))
    }
}

pub fn node(name: &str) -> Value {
    json!({
        "kind": "Node",
        "metadata": {"name": name, "resourceVersion": "1"},
        "status": {"conditions": [{"type": "Ready", "status": "True", "lastHeartbeatTime": "2015-05-01T00:00:00Z"}]}
    })
}

pub fn pod(name: &str, node: &str, labels: &[(&str, &str)]) -> Value {
    let labels: serde_json::Map<String, Value> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    json!({
        "kind": "Pod",
        "metadata": {"name": name, "namespace": "default", "labels": labels, "resourceVersion": "1"},
        "spec": {"nodeName": node, "containers": [{"name": "main", "image": "nginx"}]}
    })
}

pub fn service(name: &str, selector: &[(&str, &str)]) -> Value {
    let selector: serde_json::Map<String, Value> = selector
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect();
    json!({
        "kind": "Service",
        "metadata": {"name": name, "namespace": "default", "resourceVersion": "1"},
        "spec": {"selector": selector}
    })
}

pub fn container(id: &str, pod: &str) -> Value {
    json!({
        "Id": id,
        "Name": format!("/k8s_main_{pod}_default_uid_0"),
        "Config": {"Image": "nginx"},
        "State": {"Pid": 100, "Running": true}
    })
}

pub fn process(container_id: &str, pid: u32) -> Value {
    json!({"ContainerId": container_id, "PID": pid.to_string(), "USER": "root", "COMMAND": "nginx"})
}
