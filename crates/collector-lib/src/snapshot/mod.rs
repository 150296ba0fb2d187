//! Snapshot publication
//!
//! Each cycle ends by assembling an immutable [`GraphSnapshot`] and
//! swapping it in as the one readers observe. Readers holding an older
//! `Arc` keep a consistent view; nobody ever sees a half-built graph.

mod dot;

pub use dot::render_dot;

use crate::models::{Relation, RelationKey, Resource, ResourceKey, ResourceType};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// An immutable resource and relation set from one cycle
#[derive(Debug, Clone, Serialize)]
pub struct GraphSnapshot {
    pub timestamp: DateTime<Utc>,
    pub resources: Vec<Resource>,
    pub relations: Vec<Relation>,
    /// Publication order; 0 for the placeholder served before the first cycle
    #[serde(skip)]
    pub sequence: u64,
}

impl GraphSnapshot {
    /// The empty placeholder served before the first cycle completes
    pub fn empty() -> Self {
        Self {
            timestamp: DateTime::<Utc>::default(),
            resources: Vec::new(),
            relations: Vec::new(),
            sequence: 0,
        }
    }

    pub fn resources_of(&self, kind: ResourceType) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    pub fn resource(&self, kind: ResourceType, id: &str) -> Option<&Resource> {
        self.resources.iter().find(|r| r.kind == kind && r.id == id)
    }

    pub fn relation(&self, key: &RelationKey) -> Option<&Relation> {
        self.relations
            .iter()
            .find(|r| r.kind == key.kind && r.source == key.source && r.target == key.target)
    }

    /// Latest timestamp carried by any resource or relation
    pub fn max_timestamp(&self) -> Option<DateTime<Utc>> {
        self.resources
            .iter()
            .map(|r| r.timestamp)
            .chain(self.relations.iter().map(|r| r.timestamp))
            .max()
    }

    fn resource_keys(&self) -> HashSet<ResourceKey> {
        self.resources.iter().map(Resource::key).collect()
    }

    fn relation_keys(&self) -> HashSet<RelationKey> {
        self.relations.iter().map(Relation::key).collect()
    }

    /// True if this snapshot lost any resource or relation that `previous` held
    fn drops_from(&self, previous: &GraphSnapshot) -> bool {
        if previous.resources.is_empty() && previous.relations.is_empty() {
            return false;
        }
        let resources = self.resource_keys();
        let relations = self.relation_keys();
        previous.resources.iter().any(|r| !resources.contains(&r.key()))
            || previous.relations.iter().any(|r| !relations.contains(&r.key()))
    }
}

/// Holds the current snapshot behind an atomic pointer
pub struct SnapshotPublisher {
    current: ArcSwap<GraphSnapshot>,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(GraphSnapshot::empty()),
        }
    }

    /// Assemble a snapshot and make it the current one
    ///
    /// The graph timestamp is the latest resource or relation timestamp,
    /// raised to `now` when something disappeared since the previous
    /// snapshot and never lower than the previous snapshot's.
    pub fn publish(
        &self,
        resources: Vec<Resource>,
        relations: Vec<Relation>,
        now: DateTime<Utc>,
    ) -> Arc<GraphSnapshot> {
        let previous = self.current.load_full();

        let mut snapshot = GraphSnapshot {
            timestamp: DateTime::<Utc>::default(),
            resources,
            relations,
            sequence: previous.sequence + 1,
        };

        let mut timestamp = snapshot.max_timestamp().unwrap_or(previous.timestamp);
        if snapshot.drops_from(&previous) {
            timestamp = timestamp.max(now);
        }
        snapshot.timestamp = timestamp.max(previous.timestamp);

        let snapshot = Arc::new(snapshot);
        self.current.store(Arc::clone(&snapshot));
        snapshot
    }

    /// The latest published snapshot; never blocks
    pub fn current(&self) -> Arc<GraphSnapshot> {
        self.current.load_full()
    }
}
