//! Graphviz rendering of a snapshot for debugging

use super::GraphSnapshot;
use crate::models::ResourceType;
use std::fmt::Write;

/// Render the snapshot structure as a DOT digraph
pub fn render_dot(snapshot: &GraphSnapshot) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph context_graph {{");
    let _ = writeln!(out, "  // timestamp {}", snapshot.timestamp.to_rfc3339());

    for resource in &snapshot.resources {
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\\n{}\" shape={}];",
            escape(&resource.id),
            resource.kind,
            escape(resource.label()),
            shape(resource.kind)
        );
    }

    for relation in &snapshot.relations {
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"];",
            escape(&relation.source),
            escape(&relation.target),
            relation.kind
        );
    }

    out.push_str("}\n");
    out
}

fn shape(kind: ResourceType) -> &'static str {
    match kind {
        ResourceType::Node => "box3d",
        ResourceType::Pod => "box",
        ResourceType::Service | ResourceType::ReplicationController => "hexagon",
        ResourceType::Container => "component",
        ResourceType::Image => "note",
        ResourceType::Process => "ellipse",
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Relation, RelationType, Resource, ResourceFields, LABEL_ANNOTATION};
    use chrono::{DateTime, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn test_render_dot() {
        let snapshot = GraphSnapshot {
            timestamp: DateTime::<Utc>::default(),
            resources: vec![Resource {
                id: "n\"1".to_string(),
                kind: ResourceType::Node,
                timestamp: DateTime::<Utc>::default(),
                properties: serde_json::Value::Null,
                annotations: BTreeMap::from([(LABEL_ANNOTATION.to_string(), "n1".to_string())]),
                fields: ResourceFields::Node,
            }],
            relations: vec![Relation {
                kind: RelationType::Contains,
                timestamp: DateTime::<Utc>::default(),
                source: "n\"1".to_string(),
                target: "default/p1".to_string(),
                annotations: BTreeMap::new(),
            }],
            sequence: 1,
        };

        let dot = render_dot(&snapshot);
        assert!(dot.starts_with("digraph context_graph {"));
        assert!(dot.contains(r#""n\"1" [label="Node\nn1" shape=box3d];"#));
        assert!(dot.contains(r#""n\"1" -> "default/p1" [label="contains"];"#));
        assert!(dot.trim_end().ends_with('}'));
    }
}
