//! Resource cache
//!
//! Keeps the canonical state of every resource seen in the cluster. A
//! resource's timestamp moves only when its content hash changes; a fetch
//! that reproduces the same content only advances `last_seen`. Entries
//! are removed solely by age, so a source that fails for a few cycles
//! keeps its previous contribution.

mod canonical;

pub use canonical::{canonicalize, content_hash, VOLATILE_FIELDS};

use crate::error::RecordError;
use crate::models::{Resource, ResourceKey, ResourceType, SourceKind, LABEL_ANNOTATION};
use crate::schema;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

/// Default retention window for unreported resources
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// A cache entry: the published resource plus change-tracking state
#[derive(Debug, Clone)]
pub struct CachedResource {
    pub resource: Resource,
    pub content_hash: String,
    /// Most recent successful fetch that still reported this resource
    pub last_seen: DateTime<Utc>,
    /// Source that last changed this entry
    pub owner: String,
    /// Most recent fetch in which the owner itself reported this resource
    pub owner_last_seen: DateTime<Utc>,
}

/// Outcome of one ingest call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub inserted: usize,
    pub changed: usize,
    pub refreshed: usize,
    pub malformed: usize,
    pub conflicts: usize,
}

impl IngestStats {
    pub fn merge(&mut self, other: &IngestStats) {
        self.inserted += other.inserted;
        self.changed += other.changed;
        self.refreshed += other.refreshed;
        self.malformed += other.malformed;
        self.conflicts += other.conflicts;
    }

    /// Records that were rejected for any reason
    pub fn rejected(&self) -> usize {
        self.malformed + self.conflicts
    }
}

/// Keyed store of canonicalized resource state
pub struct ResourceCache {
    entries: HashMap<ResourceKey, CachedResource>,
    retention: chrono::Duration,
    volatile_fields: Vec<String>,
}

impl ResourceCache {
    /// Create a cache with the given retention and the default volatile fields
    pub fn new(retention: Duration) -> Self {
        Self::with_volatile_fields(
            retention,
            VOLATILE_FIELDS.iter().map(|f| f.to_string()).collect(),
        )
    }

    /// Create a cache that excludes `volatile_fields` before hashing
    pub fn with_volatile_fields(retention: Duration, volatile_fields: Vec<String>) -> Self {
        Self {
            entries: HashMap::new(),
            retention: chrono::Duration::from_std(retention)
                .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100)),
            volatile_fields,
        }
    }

    /// Merge the records one source reported for one resource type
    pub fn ingest(
        &mut self,
        source_id: &str,
        source_kind: SourceKind,
        kind: ResourceType,
        raw_resources: &[Value],
        observed_at: DateTime<Utc>,
    ) -> IngestStats {
        let mut stats = IngestStats::default();

        if kind.authority() != source_kind {
            let err = RecordError::WrongSource {
                kind,
                origin: source_kind,
            };
            debug!(source_id = %source_id, error = %err, count = raw_resources.len(), "Rejecting records");
            stats.malformed = raw_resources.len();
            return stats;
        }

        for raw in raw_resources {
            match self.ingest_one(source_id, kind, raw, observed_at) {
                Ok(Outcome::Inserted) => stats.inserted += 1,
                Ok(Outcome::Changed) => stats.changed += 1,
                Ok(Outcome::Refreshed) => stats.refreshed += 1,
                Err(err @ RecordError::Conflict { .. }) => {
                    debug!(source_id = %source_id, error = %err, "Skipping conflicting record");
                    stats.conflicts += 1;
                }
                Err(err) => {
                    debug!(source_id = %source_id, kind = %kind, error = %err, "Skipping malformed record");
                    stats.malformed += 1;
                }
            }
        }

        stats
    }

    fn ingest_one(
        &mut self,
        source_id: &str,
        kind: ResourceType,
        raw: &Value,
        observed_at: DateTime<Utc>,
    ) -> Result<Outcome, RecordError> {
        let extracted = schema::extract(kind, raw)?;
        let hash = content_hash(raw, &self.volatile_fields);
        let key = ResourceKey::new(kind, extracted.id.clone());

        let entry = match self.entries.entry(key) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                vacant.insert(CachedResource {
                    resource: Resource {
                        id: extracted.id,
                        kind,
                        timestamp: observed_at,
                        properties: raw.clone(),
                        annotations: BTreeMap::from([(
                            LABEL_ANNOTATION.to_string(),
                            extracted.label,
                        )]),
                        fields: extracted.fields,
                    },
                    content_hash: hash,
                    last_seen: observed_at,
                    owner: source_id.to_string(),
                    owner_last_seen: observed_at,
                });
                return Ok(Outcome::Inserted);
            }
        };

        let is_owner = entry.owner == source_id;
        // An owner silent for longer than the retention window gives up the entry
        let owner_expired = observed_at - entry.owner_last_seen > self.retention;
        if !is_owner && owner_expired {
            debug!(
                kind = %kind,
                id = %extracted.id,
                from = %entry.owner,
                to = %source_id,
                "Transferring resource ownership"
            );
            entry.owner = source_id.to_string();
        }
        if entry.owner == source_id {
            entry.owner_last_seen = entry.owner_last_seen.max(observed_at);
        }

        if entry.content_hash == hash {
            entry.last_seen = entry.last_seen.max(observed_at);
            return Ok(Outcome::Refreshed);
        }

        if entry.owner != source_id {
            return Err(RecordError::Conflict {
                kind,
                id: extracted.id,
                origin: source_id.to_string(),
                owner: entry.owner.clone(),
            });
        }

        let resource = &mut entry.resource;
        resource.properties = raw.clone();
        resource.fields = extracted.fields;
        resource
            .annotations
            .insert(LABEL_ANNOTATION.to_string(), extracted.label);
        resource.timestamp = resource.timestamp.max(observed_at);
        entry.content_hash = hash;
        entry.last_seen = entry.last_seen.max(observed_at);

        Ok(Outcome::Changed)
    }

    /// Remove every entry not reported within the retention window
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        let retention = self.retention;

        self.entries.retain(|key, entry| {
            let keep = now - entry.last_seen <= retention;
            if !keep {
                debug!(resource = %key, last_seen = %entry.last_seen, "Evicting stale resource");
            }
            keep
        });

        before - self.entries.len()
    }

    /// Point-in-time copy of all cached resources, ordered by key
    pub fn current_resources(&self) -> Vec<Resource> {
        let mut entries: Vec<(&ResourceKey, &CachedResource)> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
            .into_iter()
            .map(|(_, entry)| entry.resource.clone())
            .collect()
    }

    /// Look up a single entry
    pub fn get(&self, kind: ResourceType, id: &str) -> Option<&CachedResource> {
        self.entries.get(&ResourceKey::new(kind, id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

enum Outcome {
    Inserted,
    Changed,
    Refreshed,
}
