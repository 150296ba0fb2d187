//! Read-only query façade over the published snapshot

use crate::models::{Resource, ResourceType};
use crate::snapshot::{render_dot, GraphSnapshot, SnapshotPublisher};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Current resources of one type
#[derive(Debug, Clone, Serialize)]
pub struct ResourceList {
    /// Timestamp of the snapshot the list was taken from
    pub timestamp: DateTime<Utc>,
    pub resources: Vec<Resource>,
}

/// Answers client queries from whatever snapshot is current
#[derive(Clone)]
pub struct GraphQuery {
    publisher: Arc<SnapshotPublisher>,
}

impl GraphQuery {
    pub fn new(publisher: Arc<SnapshotPublisher>) -> Self {
        Self { publisher }
    }

    pub fn graph(&self) -> Arc<GraphSnapshot> {
        self.publisher.current()
    }

    pub fn resources_by_type(&self, kind: ResourceType) -> ResourceList {
        let snapshot = self.publisher.current();
        ResourceList {
            timestamp: snapshot.timestamp,
            resources: snapshot.resources_of(kind).cloned().collect(),
        }
    }

    /// The current snapshot as a Graphviz digraph
    pub fn debug_graph(&self) -> String {
        render_dot(&self.publisher.current())
    }
}
