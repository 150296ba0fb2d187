//! Core data models for the context graph

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Annotation key holding the display label of a resource or relation
pub const LABEL_ANNOTATION: &str = "label";

/// Kind of source a raw record was fetched from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// The cluster control-plane API
    ControlPlane,
    /// A per-node agent reached through its proxy endpoint
    NodeAgent,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::ControlPlane => "control_plane",
            SourceKind::NodeAgent => "node_agent",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The seven resource types tracked in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Node,
    Pod,
    Service,
    ReplicationController,
    Container,
    Image,
    Process,
}

impl ResourceType {
    pub const ALL: [ResourceType; 7] = [
        ResourceType::Node,
        ResourceType::Pod,
        ResourceType::Service,
        ResourceType::ReplicationController,
        ResourceType::Container,
        ResourceType::Image,
        ResourceType::Process,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Node => "Node",
            ResourceType::Pod => "Pod",
            ResourceType::Service => "Service",
            ResourceType::ReplicationController => "ReplicationController",
            ResourceType::Container => "Container",
            ResourceType::Image => "Image",
            ResourceType::Process => "Process",
        }
    }

    /// Plural path segment used by the query endpoints
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceType::Node => "nodes",
            ResourceType::Pod => "pods",
            ResourceType::Service => "services",
            ResourceType::ReplicationController => "rcontrollers",
            ResourceType::Container => "containers",
            ResourceType::Image => "images",
            ResourceType::Process => "processes",
        }
    }

    /// The only source kind whose records of this type are accepted
    pub fn authority(&self) -> SourceKind {
        match self {
            ResourceType::Node
            | ResourceType::Pod
            | ResourceType::Service
            | ResourceType::ReplicationController => SourceKind::ControlPlane,
            ResourceType::Container | ResourceType::Image | ResourceType::Process => {
                SourceKind::NodeAgent
            }
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a resource type name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown resource type `{0}`")]
pub struct UnknownResourceType(pub String);

impl FromStr for ResourceType {
    type Err = UnknownResourceType;

    /// Accepts the singular name, the plural path segment, or the short
    /// controller alias, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        ResourceType::ALL
            .into_iter()
            .find(|kind| {
                kind.as_str().eq_ignore_ascii_case(&lowered)
                    || kind.plural() == lowered
                    || (*kind == ResourceType::ReplicationController
                        && matches!(lowered.as_str(), "rc" | "rcontroller" | "replicationcontrollers"))
            })
            .ok_or_else(|| UnknownResourceType(s.to_string()))
    }
}

/// Unique identity of a resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceType,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Typed view of the fields the inference rules rely on
///
/// Everything else a source reports stays in [`Resource::properties`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceFields {
    Node,
    Pod {
        namespace: String,
        node_name: Option<String>,
        labels: BTreeMap<String, String>,
        images: Vec<String>,
    },
    Service {
        namespace: String,
        selector: Option<BTreeMap<String, String>>,
    },
    ReplicationController {
        namespace: String,
        selector: Option<BTreeMap<String, String>>,
    },
    Container {
        /// Id of the owning pod resource
        pod: Option<String>,
        image: Option<String>,
        pid: Option<u32>,
    },
    Image,
    Process {
        container_id: String,
        pid: u32,
    },
}

/// A resource as it appears in a published snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ResourceType,
    /// Instant the current content was first observed
    pub timestamp: DateTime<Utc>,
    pub properties: Value,
    pub annotations: BTreeMap<String, String>,
    #[serde(skip)]
    pub fields: ResourceFields,
}

impl Resource {
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, self.id.clone())
    }

    pub fn label(&self) -> &str {
        self.annotations
            .get(LABEL_ANNOTATION)
            .map(String::as_str)
            .unwrap_or(&self.id)
    }
}

/// The relation types inferred between resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationType {
    Contains,
    Runs,
    Monitors,
    LoadBalances,
    CreatedFrom,
}

impl RelationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::Contains => "contains",
            RelationType::Runs => "runs",
            RelationType::Monitors => "monitors",
            RelationType::LoadBalances => "loadBalances",
            RelationType::CreatedFrom => "createdFrom",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unique identity of a relation: the `(type, source, target)` triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationKey {
    pub kind: RelationType,
    pub source: String,
    pub target: String,
}

impl RelationKey {
    pub fn new(kind: RelationType, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// A typed directed edge between two resources
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relation {
    #[serde(rename = "type")]
    pub kind: RelationType,
    /// First instant this exact triple was inferred
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub target: String,
    pub annotations: BTreeMap<String, String>,
}

impl Relation {
    pub fn key(&self) -> RelationKey {
        RelationKey::new(self.kind, self.source.clone(), self.target.clone())
    }
}
