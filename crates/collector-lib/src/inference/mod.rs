//! Relationship inference
//!
//! Relations are recomputed in full every cycle from the live resource set.
//! The only state kept between cycles is the first-seen instant of each
//! `(type, source, target)` triple, so a persisting relation keeps its
//! original timestamp and a vanished one is forgotten immediately.

mod rules;

pub use rules::{derive, DerivedEdges};

use crate::models::{Relation, RelationKey, Resource, LABEL_ANNOTATION};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// Relations produced by one inference pass
#[derive(Debug, Clone, Default)]
pub struct InferenceOutput {
    /// Relations ordered by triple
    pub relations: Vec<Relation>,
    pub skipped: usize,
}

/// Derives relations and keeps their timestamps stable across cycles
#[derive(Debug, Default)]
pub struct RelationInferrer {
    first_seen: HashMap<RelationKey, DateTime<Utc>>,
}

impl RelationInferrer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Infer the relation set for `resources` as of the cycle instant `now`
    pub fn infer(&mut self, resources: &[Resource], now: DateTime<Utc>) -> InferenceOutput {
        let derived = derive(resources);

        let mut next = HashMap::with_capacity(derived.edges.len());
        let relations = derived
            .edges
            .into_iter()
            .map(|key| {
                let timestamp = self.first_seen.get(&key).copied().unwrap_or(now);
                next.insert(key.clone(), timestamp);
                Relation {
                    kind: key.kind,
                    timestamp,
                    annotations: BTreeMap::from([(
                        LABEL_ANNOTATION.to_string(),
                        key.kind.as_str().to_string(),
                    )]),
                    source: key.source,
                    target: key.target,
                }
            })
            .collect();

        self.first_seen = next;

        InferenceOutput {
            relations,
            skipped: derived.skipped,
        }
    }

    /// Number of triples currently remembered
    pub fn tracked(&self) -> usize {
        self.first_seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RelationType, ResourceFields, ResourceType};
    use chrono::TimeZone;
    use serde_json::Value;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn node(id: &str) -> Resource {
        Resource {
            id: id.to_string(),
            kind: ResourceType::Node,
            timestamp: at(0),
            properties: Value::Null,
            annotations: BTreeMap::new(),
            fields: ResourceFields::Node,
        }
    }

    fn pod_on(node: &str) -> Resource {
        Resource {
            id: "default/p1".to_string(),
            kind: ResourceType::Pod,
            timestamp: at(0),
            properties: Value::Null,
            annotations: BTreeMap::new(),
            fields: ResourceFields::Pod {
                namespace: "default".to_string(),
                node_name: Some(node.to_string()),
                labels: BTreeMap::new(),
                images: Vec::new(),
            },
        }
    }

    #[test]
    fn test_persisting_relation_keeps_first_timestamp() {
        let mut inferrer = RelationInferrer::new();
        let resources = vec![node("n1"), pod_on("n1")];

        let first = inferrer.infer(&resources, at(0));
        let second = inferrer.infer(&resources, at(10));

        assert_eq!(first.relations.len(), 1);
        assert_eq!(second.relations[0].timestamp, at(0));
        assert_eq!(second.relations[0].kind, RelationType::Contains);
        assert_eq!(second.relations[0].annotations[LABEL_ANNOTATION], "contains");
    }

    #[test]
    fn test_vanished_relation_is_dropped_without_grace() {
        let mut inferrer = RelationInferrer::new();
        inferrer.infer(&[node("n1"), node("n2"), pod_on("n1")], at(0));

        let moved = inferrer.infer(&[node("n1"), node("n2"), pod_on("n2")], at(20));
        assert_eq!(moved.relations.len(), 1);
        assert_eq!(moved.relations[0].source, "n2");
        assert_eq!(moved.relations[0].timestamp, at(20));
        assert_eq!(inferrer.tracked(), 1);

        // Moving back is a new relation, not a revival of the old one
        let back = inferrer.infer(&[node("n1"), node("n2"), pod_on("n1")], at(30));
        assert_eq!(back.relations[0].source, "n1");
        assert_eq!(back.relations[0].timestamp, at(30));
    }
}
