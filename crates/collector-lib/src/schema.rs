//! Record schemas for the seven resource types
//!
//! Raw records arrive as loosely typed JSON. This module pulls out the id,
//! a display label and the [`ResourceFields`] the inference rules need,
//! leaving the raw object itself untouched.

use crate::error::RecordError;
use crate::models::{ResourceFields, ResourceType};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const DEFAULT_NAMESPACE: &str = "default";
const POD_NAME_LABEL: &str = "io.kubernetes.pod.name";
const POD_NAMESPACE_LABEL: &str = "io.kubernetes.pod.namespace";
const UNTAGGED_IMAGE: &str = "<none>:<none>";

/// Result of extracting a raw record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub id: String,
    pub label: String,
    pub fields: ResourceFields,
}

/// Extract the id, label and typed fields of a raw record
pub fn extract(kind: ResourceType, raw: &Value) -> Result<Extracted, RecordError> {
    let obj = raw.as_object().ok_or(RecordError::NotAnObject)?;

    match kind {
        ResourceType::Node => {
            let name = required_str(obj, &["metadata", "name"], "metadata.name")?;
            Ok(Extracted {
                id: name.to_string(),
                label: name.to_string(),
                fields: ResourceFields::Node,
            })
        }
        ResourceType::Pod => {
            let (namespace, name) = namespaced_name(obj)?;
            let images = lookup(obj, &["spec", "containers"])
                .and_then(Value::as_array)
                .map(|containers| {
                    containers
                        .iter()
                        .filter_map(|c| c.get("image").and_then(Value::as_str))
                        .map(normalize_image)
                        .collect()
                })
                .unwrap_or_default();

            Ok(Extracted {
                id: qualified(&namespace, &name),
                label: name,
                fields: ResourceFields::Pod {
                    namespace,
                    node_name: lookup_str(obj, &["spec", "nodeName"])
                        .filter(|n| !n.is_empty())
                        .map(str::to_string),
                    labels: string_map(lookup(obj, &["metadata", "labels"])).unwrap_or_default(),
                    images,
                },
            })
        }
        ResourceType::Service => {
            let (namespace, name) = namespaced_name(obj)?;
            Ok(Extracted {
                id: qualified(&namespace, &name),
                label: name,
                fields: ResourceFields::Service {
                    selector: string_map(lookup(obj, &["spec", "selector"])),
                    namespace,
                },
            })
        }
        ResourceType::ReplicationController => {
            let (namespace, name) = namespaced_name(obj)?;
            Ok(Extracted {
                id: qualified(&namespace, &name),
                label: name,
                fields: ResourceFields::ReplicationController {
                    selector: string_map(lookup(obj, &["spec", "selector"])),
                    namespace,
                },
            })
        }
        ResourceType::Container => {
            let id = required_str(obj, &["Id"], "Id")?;
            let name = lookup_str(obj, &["Name"])
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| short_id(id).to_string());

            let labels = string_map(lookup(obj, &["Config", "Labels"])).unwrap_or_default();
            let pod = match (labels.get(POD_NAME_LABEL), labels.get(POD_NAMESPACE_LABEL)) {
                (Some(pod), namespace) => Some(qualified(
                    namespace.map(String::as_str).unwrap_or(DEFAULT_NAMESPACE),
                    pod,
                )),
                (None, _) => pod_from_container_name(&name),
            };

            let pid = match lookup(obj, &["State", "Pid"]).and_then(Value::as_u64) {
                // Pid 0 means the container is not running
                Some(0) | None => None,
                Some(pid) => Some(u32::try_from(pid).map_err(|_| RecordError::InvalidField {
                    field: "State.Pid",
                    reason: format!("{pid} is out of range"),
                })?),
            };

            Ok(Extracted {
                id: id.to_string(),
                label: name,
                fields: ResourceFields::Container {
                    pod,
                    image: lookup_str(obj, &["Config", "Image"]).map(normalize_image),
                    pid,
                },
            })
        }
        ResourceType::Image => {
            let tag = obj
                .get("RepoTags")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .find(|t| *t != UNTAGGED_IMAGE);

            let id = match tag {
                Some(tag) => normalize_image(tag),
                None => required_str(obj, &["Id"], "Id")?.to_string(),
            };

            Ok(Extracted {
                label: id.clone(),
                id,
                fields: ResourceFields::Image,
            })
        }
        ResourceType::Process => {
            let container_id = required_str(obj, &["ContainerId"], "ContainerId")?;
            let pid = parse_pid(obj.get("PID").ok_or(RecordError::MissingField("PID"))?)?;
            let command = ["COMMAND", "CMD"]
                .iter()
                .find_map(|key| obj.get(*key).and_then(Value::as_str))
                .and_then(|cmd| cmd.split_whitespace().next())
                .unwrap_or("?");

            Ok(Extracted {
                id: format!("{}/{}", short_id(container_id), pid),
                label: format!("{pid}:{command}"),
                fields: ResourceFields::Process {
                    container_id: container_id.to_string(),
                    pid,
                },
            })
        }
    }
}

/// Normalize an image reference so that `nginx` and `nginx:latest` match
pub fn normalize_image(reference: &str) -> String {
    let reference = reference.trim();
    if reference.contains('@') {
        return reference.to_string();
    }

    // A colon after the last slash is a tag; one before it is a registry port
    let last_segment = reference.rsplit('/').next().unwrap_or(reference);
    if last_segment.contains(':') {
        reference.to_string()
    } else {
        format!("{reference}:latest")
    }
}

/// Build the id of a namespaced resource
pub fn qualified(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

/// Parse `k8s_<container>_<pod>_<namespace>_<uid>_<attempt>`
fn pod_from_container_name(name: &str) -> Option<String> {
    let mut parts = name.strip_prefix("k8s_")?.split('_');
    let _container = parts.next()?;
    let pod = parts.next()?;
    let namespace = parts.next()?;
    if pod.is_empty() || namespace.is_empty() {
        return None;
    }
    Some(qualified(namespace, pod))
}

fn parse_pid(value: &Value) -> Result<u32, RecordError> {
    let invalid = |reason: String| RecordError::InvalidField {
        field: "PID",
        reason,
    };

    match value {
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|e| invalid(format!("`{s}`: {e}"))),
        Value::Number(n) => n
            .as_u64()
            .and_then(|pid| u32::try_from(pid).ok())
            .ok_or_else(|| invalid(format!("{n} is not a process id"))),
        other => Err(invalid(format!("unexpected value {other}"))),
    }
}

fn namespaced_name(obj: &Map<String, Value>) -> Result<(String, String), RecordError> {
    let name = required_str(obj, &["metadata", "name"], "metadata.name")?;
    let namespace = lookup_str(obj, &["metadata", "namespace"])
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);
    Ok((namespace.to_string(), name.to_string()))
}

fn lookup<'a>(obj: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    rest.iter()
        .try_fold(obj.get(*first)?, |value, key| value.get(*key))
}

fn lookup_str<'a>(obj: &'a Map<String, Value>, path: &[&str]) -> Option<&'a str> {
    lookup(obj, path).and_then(Value::as_str)
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    path: &[&str],
    field: &'static str,
) -> Result<&'a str, RecordError> {
    lookup_str(obj, path)
        .filter(|s| !s.is_empty())
        .ok_or(RecordError::MissingField(field))
}

/// Read a JSON object of string values; non-string values are skipped
fn string_map(value: Option<&Value>) -> Option<BTreeMap<String, String>> {
    value.and_then(Value::as_object).map(|obj| {
        obj.iter()
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_pod() {
        let raw = json!({
            "metadata": {"name": "p1", "namespace": "web", "labels": {"app": "nginx"}},
            "spec": {"nodeName": "n1", "containers": [{"name": "c", "image": "nginx"}]}
        });

        let extracted = extract(ResourceType::Pod, &raw).unwrap();
        assert_eq!(extracted.id, "web/p1");
        assert_eq!(extracted.label, "p1");
        match extracted.fields {
            ResourceFields::Pod {
                namespace,
                node_name,
                labels,
                images,
            } => {
                assert_eq!(namespace, "web");
                assert_eq!(node_name.as_deref(), Some("n1"));
                assert_eq!(labels.get("app").map(String::as_str), Some("nginx"));
                assert_eq!(images, vec!["nginx:latest".to_string()]);
            }
            other => panic!("unexpected fields {other:?}"),
        }
    }

    #[test]
    fn test_extract_pod_defaults_namespace() {
        let raw = json!({"metadata": {"name": "p1"}, "spec": {}});
        let extracted = extract(ResourceType::Pod, &raw).unwrap();
        assert_eq!(extracted.id, "default/p1");
    }

    #[test]
    fn test_extract_missing_name_is_malformed() {
        let raw = json!({"metadata": {}});
        assert_eq!(
            extract(ResourceType::Node, &raw),
            Err(RecordError::MissingField("metadata.name"))
        );
        assert_eq!(
            extract(ResourceType::Node, &json!("n1")),
            Err(RecordError::NotAnObject)
        );
    }

    #[test]
    fn test_service_without_selector() {
        let raw = json!({"metadata": {"name": "s1"}, "spec": {"clusterIP": "10.0.0.1"}});
        let extracted = extract(ResourceType::Service, &raw).unwrap();
        assert_eq!(
            extracted.fields,
            ResourceFields::Service {
                namespace: "default".to_string(),
                selector: None,
            }
        );
    }

    #[test]
    fn test_extract_container_from_labels() {
        let raw = json!({
            "Id": "0123456789abcdef0123",
            "Name": "/k8s_web_ignored_ignored_uid_0",
            "Config": {
                "Image": "nginx:1.25",
                "Labels": {"io.kubernetes.pod.name": "p1", "io.kubernetes.pod.namespace": "web"}
            },
            "State": {"Pid": 4242}
        });

        let extracted = extract(ResourceType::Container, &raw).unwrap();
        assert_eq!(extracted.label, "k8s_web_ignored_ignored_uid_0");
        assert_eq!(
            extracted.fields,
            ResourceFields::Container {
                pod: Some("web/p1".to_string()),
                image: Some("nginx:1.25".to_string()),
                pid: Some(4242),
            }
        );
    }

    #[test]
    fn test_extract_container_pod_from_name() {
        let raw = json!({
            "Id": "abc",
            "Name": "/k8s_web_p1_default_0f1e_0",
            "State": {"Pid": 0}
        });

        let extracted = extract(ResourceType::Container, &raw).unwrap();
        assert_eq!(
            extracted.fields,
            ResourceFields::Container {
                pod: Some("default/p1".to_string()),
                image: None,
                pid: None,
            }
        );
    }

    #[test]
    fn test_extract_image_prefers_tag() {
        let raw = json!({"Id": "sha256:1234", "RepoTags": ["<none>:<none>", "redis:7"]});
        assert_eq!(extract(ResourceType::Image, &raw).unwrap().id, "redis:7");

        let untagged = json!({"Id": "sha256:1234", "RepoTags": null});
        assert_eq!(extract(ResourceType::Image, &untagged).unwrap().id, "sha256:1234");
    }

    #[test]
    fn test_extract_process() {
        let raw = json!({"ContainerId": "0123456789abcdef", "PID": "77", "COMMAND": "nginx -g daemon off;"});
        let extracted = extract(ResourceType::Process, &raw).unwrap();
        assert_eq!(extracted.id, "0123456789ab/77");
        assert_eq!(extracted.label, "77:nginx");

        let bad = json!({"ContainerId": "abc", "PID": "seventy"});
        assert!(matches!(
            extract(ResourceType::Process, &bad),
            Err(RecordError::InvalidField { field: "PID", .. })
        ));
    }

    #[test]
    fn test_normalize_image() {
        assert_eq!(normalize_image("nginx"), "nginx:latest");
        assert_eq!(normalize_image("nginx:1.25"), "nginx:1.25");
        assert_eq!(normalize_image("registry:5000/app"), "registry:5000/app:latest");
        assert_eq!(normalize_image("app@sha256:abcd"), "app@sha256:abcd");
    }
}
