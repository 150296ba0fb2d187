//! The fixed rule set
//!
//! Every rule reads only resource fields, never the output of another rule.
//! An edge is produced only when both endpoints are present.

use crate::models::{RelationKey, RelationType, Resource, ResourceFields, ResourceType};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Edges derived from one resource set
#[derive(Debug, Default)]
pub struct DerivedEdges {
    pub edges: BTreeSet<RelationKey>,
    /// Rule evaluations skipped because a field was missing
    pub skipped: usize,
}

impl DerivedEdges {
    fn add(&mut self, kind: RelationType, source: &str, target: &str) {
        self.edges.insert(RelationKey::new(kind, source, target));
    }

    fn skip(&mut self, rule: &str, resource: &Resource, field: &str) {
        debug!(rule = %rule, resource = %resource.key(), field = %field, "Inference rule skipped");
        self.skipped += 1;
    }
}

/// Apply every rule to the resource set
pub fn derive(resources: &[Resource]) -> DerivedEdges {
    let index = Index::build(resources);
    let mut out = DerivedEdges::default();

    for resource in resources {
        match &resource.fields {
            ResourceFields::Pod {
                node_name, images, ..
            } => {
                match node_name {
                    Some(node) if index.has(ResourceType::Node, node) => {
                        out.add(RelationType::Contains, node, &resource.id)
                    }
                    Some(_) => {}
                    None => out.skip("node-contains-pod", resource, "spec.nodeName"),
                }
                for image in images {
                    if index.has(ResourceType::Image, image) {
                        out.add(RelationType::CreatedFrom, &resource.id, image);
                    }
                }
            }
            ResourceFields::Container { pod, image, pid } => {
                match pod {
                    Some(pod) if index.has(ResourceType::Pod, pod) => {
                        out.add(RelationType::Contains, pod, &resource.id)
                    }
                    Some(_) => {}
                    None => out.skip("pod-contains-container", resource, "pod reference"),
                }
                match image {
                    Some(image) if index.has(ResourceType::Image, image) => {
                        out.add(RelationType::CreatedFrom, &resource.id, image)
                    }
                    Some(_) => {}
                    None => out.skip("container-created-from-image", resource, "Config.Image"),
                }
                if pid.is_none() {
                    out.skip("container-monitors-process", resource, "State.Pid");
                }
            }
            ResourceFields::Process { container_id, pid } => {
                if let Some(container) = index.containers.get(container_id.as_str()) {
                    out.add(RelationType::Runs, &container.id, &resource.id);
                    if let ResourceFields::Container {
                        pid: Some(init_pid),
                        ..
                    } = &container.fields
                    {
                        if init_pid == pid {
                            out.add(RelationType::Monitors, &container.id, &resource.id);
                        }
                    }
                }
            }
            ResourceFields::Service {
                namespace,
                selector,
            } => match selector {
                Some(selector) => {
                    for pod in index.pods_matching(namespace, selector) {
                        out.add(RelationType::LoadBalances, &resource.id, pod);
                    }
                }
                None => out.skip("service-load-balances-pod", resource, "spec.selector"),
            },
            ResourceFields::ReplicationController {
                namespace,
                selector,
            } => match selector {
                Some(selector) => {
                    for pod in index.pods_matching(namespace, selector) {
                        out.add(RelationType::Monitors, &resource.id, pod);
                    }
                }
                None => out.skip("rc-monitors-pod", resource, "spec.selector"),
            },
            ResourceFields::Node | ResourceFields::Image => {}
        }
    }

    out
}

struct PodView<'a> {
    id: &'a str,
    namespace: &'a str,
    labels: &'a BTreeMap<String, String>,
}

struct Index<'a> {
    present: HashSet<(ResourceType, &'a str)>,
    containers: HashMap<&'a str, &'a Resource>,
    pods: Vec<PodView<'a>>,
}

impl<'a> Index<'a> {
    fn build(resources: &'a [Resource]) -> Self {
        let mut index = Index {
            present: HashSet::with_capacity(resources.len()),
            containers: HashMap::new(),
            pods: Vec::new(),
        };

        for resource in resources {
            index.present.insert((resource.kind, resource.id.as_str()));
            match &resource.fields {
                ResourceFields::Container { .. } => {
                    index.containers.insert(resource.id.as_str(), resource);
                }
                ResourceFields::Pod {
                    namespace, labels, ..
                } => index.pods.push(PodView {
                    id: &resource.id,
                    namespace,
                    labels,
                }),
                _ => {}
            }
        }

        index
    }

    fn has(&self, kind: ResourceType, id: &str) -> bool {
        self.present.contains(&(kind, id))
    }

    /// Pods in `namespace` whose labels contain every selector entry.
    /// An empty selector selects nothing.
    fn pods_matching<'s>(
        &'s self,
        namespace: &'s str,
        selector: &'s BTreeMap<String, String>,
    ) -> impl Iterator<Item = &'a str> + 's {
        self.pods
            .iter()
            .filter(move |pod| {
                !selector.is_empty()
                    && pod.namespace == namespace
                    && selector
                        .iter()
                        .all(|(k, v)| pod.labels.get(k).is_some_and(|l| l == v))
            })
            .map(|pod| pod.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LABEL_ANNOTATION;
    use chrono::{DateTime, Utc};
    use serde_json::Value;

    fn resource(kind: ResourceType, id: &str, fields: ResourceFields) -> Resource {
        Resource {
            id: id.to_string(),
            kind,
            timestamp: DateTime::<Utc>::default(),
            properties: Value::Null,
            annotations: BTreeMap::from([(LABEL_ANNOTATION.to_string(), id.to_string())]),
            fields,
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn pod(id: &str, node: Option<&str>, pod_labels: &[(&str, &str)]) -> Resource {
        resource(
            ResourceType::Pod,
            id,
            ResourceFields::Pod {
                namespace: id.split('/').next().unwrap_or("default").to_string(),
                node_name: node.map(str::to_string),
                labels: labels(pod_labels),
                images: vec!["nginx:latest".to_string()],
            },
        )
    }

    fn service(id: &str, selector: Option<&[(&str, &str)]>) -> Resource {
        resource(
            ResourceType::Service,
            id,
            ResourceFields::Service {
                namespace: "default".to_string(),
                selector: selector.map(labels),
            },
        )
    }

    #[test]
    fn test_node_contains_pod_requires_both_ends() {
        let resources = vec![
            resource(ResourceType::Node, "n1", ResourceFields::Node),
            pod("default/p1", Some("n1"), &[]),
            pod("default/p2", Some("missing"), &[]),
        ];

        let derived = derive(&resources);
        assert!(derived
            .edges
            .contains(&RelationKey::new(RelationType::Contains, "n1", "default/p1")));
        assert_eq!(derived.edges.len(), 1);
    }

    #[test]
    fn test_label_selector_matching() {
        let resources = vec![
            pod("default/p1", None, &[("app", "web"), ("tier", "front")]),
            pod("default/p2", None, &[("app", "db")]),
            pod("other/p3", None, &[("app", "web")]),
            service("default/s1", Some(&[("app", "web")])),
            service("default/empty", Some(&[])),
        ];

        let derived = derive(&resources);
        let balanced: Vec<&RelationKey> = derived
            .edges
            .iter()
            .filter(|k| k.kind == RelationType::LoadBalances)
            .collect();
        assert_eq!(
            balanced,
            vec![&RelationKey::new(RelationType::LoadBalances, "default/s1", "default/p1")]
        );
    }

    #[test]
    fn test_missing_fields_skip_only_that_rule() {
        let resources = vec![
            resource(ResourceType::Node, "n1", ResourceFields::Node),
            pod("default/p1", None, &[("app", "web")]),
            pod("default/p2", Some("n1"), &[("app", "web")]),
            service("default/headless", None),
            service("default/s1", Some(&[("app", "web")])),
        ];

        let derived = derive(&resources);
        // p1 has no node, headless has no selector
        assert_eq!(derived.skipped, 2);
        assert!(derived
            .edges
            .contains(&RelationKey::new(RelationType::Contains, "n1", "default/p2")));
        assert!(derived
            .edges
            .contains(&RelationKey::new(RelationType::LoadBalances, "default/s1", "default/p1")));
    }

    #[test]
    fn test_container_process_and_image_rules() {
        let resources = vec![
            pod("default/p1", None, &[]),
            resource(ResourceType::Image, "nginx:latest", ResourceFields::Image),
            resource(
                ResourceType::Container,
                "c1",
                ResourceFields::Container {
                    pod: Some("default/p1".to_string()),
                    image: Some("nginx:latest".to_string()),
                    pid: Some(100),
                },
            ),
            resource(
                ResourceType::Process,
                "c1/100",
                ResourceFields::Process {
                    container_id: "c1".to_string(),
                    pid: 100,
                },
            ),
            resource(
                ResourceType::Process,
                "c1/101",
                ResourceFields::Process {
                    container_id: "c1".to_string(),
                    pid: 101,
                },
            ),
        ];

        let derived = derive(&resources);
        let expected = [
            RelationKey::new(RelationType::Contains, "default/p1", "c1"),
            RelationKey::new(RelationType::CreatedFrom, "c1", "nginx:latest"),
            RelationKey::new(RelationType::CreatedFrom, "default/p1", "nginx:latest"),
            RelationKey::new(RelationType::Runs, "c1", "c1/100"),
            RelationKey::new(RelationType::Runs, "c1", "c1/101"),
            RelationKey::new(RelationType::Monitors, "c1", "c1/100"),
        ];
        for key in &expected {
            assert!(derived.edges.contains(key), "missing {key:?}");
        }
        assert_eq!(derived.edges.len(), expected.len());
    }

    #[test]
    fn test_replication_controller_monitors_pods() {
        let resources = vec![
            pod("default/p1", None, &[("app", "web")]),
            resource(
                ResourceType::ReplicationController,
                "default/rc1",
                ResourceFields::ReplicationController {
                    namespace: "default".to_string(),
                    selector: Some(labels(&[("app", "web")])),
                },
            ),
        ];

        let derived = derive(&resources);
        assert!(derived
            .edges
            .contains(&RelationKey::new(RelationType::Monitors, "default/rc1", "default/p1")));
    }
}
