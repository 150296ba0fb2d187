//! Docker-remote-API node agent adapter
//!
//! Every node runs an agent that speaks the Docker remote API. Containers
//! are listed and then inspected one by one, processes come from `top` on
//! each running container, and images from the image summary list.

use super::{async_trait, NodeAgentFactory, ResourceSource};
use crate::error::SourceError;
use crate::models::{ResourceType, SourceKind};
use reqwest::StatusCode;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Where agents listen unless configured otherwise
pub const DEFAULT_AGENT_URL_TEMPLATE: &str = "http://{node}:4243/";

const NODE_PLACEHOLDER: &str = "{node}";
const PS_ARGS: &str = "-eo pid,ppid,user,args";

/// Answers meaning the container went away after it was listed
const VANISHED: &[StatusCode] = &[StatusCode::NOT_FOUND];
/// `top` on a container that has stopped answers 409
const STOPPED: &[StatusCode] = &[StatusCode::NOT_FOUND, StatusCode::CONFLICT];

const AGENT_TYPES: &[ResourceType] = &[
    ResourceType::Container,
    ResourceType::Image,
    ResourceType::Process,
];

/// The agent on one node
pub struct NodeAgentSource {
    id: String,
    node: String,
    base_url: Url,
    client: reqwest::Client,
}

impl NodeAgentSource {
    pub fn new(
        node: impl Into<String>,
        base_url: &str,
        client: reqwest::Client,
    ) -> Result<Self, SourceError> {
        let node = node.into();
        Ok(Self {
            id: format!("agent:{node}"),
            node,
            base_url: parse_base_url(base_url)?,
            client,
        })
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// GET a JSON document; `Ok(None)` when the agent answers with one of `gone`
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        gone: &[StatusCode],
    ) -> Result<Option<Value>, SourceError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| SourceError::InvalidResponse(format!("bad path {path}: {e}")))?;

        let response = self
            .client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("{url}: {e}")))?;

        match response.status() {
            status if gone.contains(&status) => return Ok(None),
            status if !status.is_success() => {
                return Err(SourceError::Unavailable(format!("{url} returned {status}")))
            }
            _ => {}
        }

        response
            .json::<Value>()
            .await
            .map(Some)
            .map_err(|e| SourceError::InvalidResponse(format!("{url}: {e}")))
    }

    async fn get_list(&self, path: &str) -> Result<Vec<Value>, SourceError> {
        match self.get_json(path, &[], &[StatusCode::NOT_FOUND]).await? {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => Err(SourceError::InvalidResponse(format!("{path} is not a list"))),
            None => Err(SourceError::Unavailable(format!("{path} not found"))),
        }
    }

    /// Ids of the containers currently running on the node
    async fn container_ids(&self) -> Result<Vec<String>, SourceError> {
        self.get_list("containers/json")
            .await?
            .iter()
            .map(|summary| {
                summary
                    .get("Id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| SourceError::InvalidResponse("container summary without Id".into()))
            })
            .collect()
    }

    async fn containers(&self) -> Result<Vec<Value>, SourceError> {
        let mut records = Vec::new();
        for id in self.container_ids().await? {
            // A container may exit between the list and the inspect
            let Some(mut inspect) = self.get_json(&format!("containers/{id}/json"), &[], VANISHED).await? else {
                debug!(container_id = %id, "Container vanished before inspect");
                continue;
            };
            if let Some(obj) = inspect.as_object_mut() {
                obj.insert("Node".to_string(), Value::String(self.node.clone()));
            }
            records.push(inspect);
        }
        Ok(records)
    }

    async fn processes(&self) -> Result<Vec<Value>, SourceError> {
        let mut records = Vec::new();
        for id in self.container_ids().await? {
            let top = self
                .get_json(&format!("containers/{id}/top"), &[("ps_args", PS_ARGS)], STOPPED)
                .await?;
            match top {
                Some(top) => records.extend(process_rows(&id, &top)?),
                None => debug!(container_id = %id, "Container stopped before top"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl ResourceSource for NodeAgentSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::NodeAgent
    }

    fn resource_types(&self) -> &[ResourceType] {
        AGENT_TYPES
    }

    async fn list(&self, kind: ResourceType) -> Result<Vec<Value>, SourceError> {
        match kind {
            ResourceType::Container => self.containers().await,
            ResourceType::Process => self.processes().await,
            ResourceType::Image => self.get_list("images/json").await,
            other => Err(SourceError::InvalidResponse(format!(
                "node agent does not serve {other}"
            ))),
        }
    }
}

/// Turn a `top` table into one object per row, keyed by column title
fn process_rows(container_id: &str, top: &Value) -> Result<Vec<Value>, SourceError> {
    let titles: Vec<&str> = top
        .get("Titles")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::InvalidResponse("top without Titles".into()))?
        .iter()
        .filter_map(Value::as_str)
        .collect();

    let rows = top
        .get("Processes")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    Ok(rows
        .iter()
        .filter_map(Value::as_array)
        .map(|row| {
            let mut record: Map<String, Value> = titles
                .iter()
                .zip(row.iter())
                .map(|(title, cell)| (title.to_string(), cell.clone()))
                .collect();
            record.insert(
                "ContainerId".to_string(),
                Value::String(container_id.to_string()),
            );
            Value::Object(record)
        })
        .collect())
}

fn parse_base_url(raw: &str) -> Result<Url, SourceError> {
    // Without a trailing slash `join` would replace the last path segment
    let raw = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&raw).map_err(|e| SourceError::InvalidResponse(format!("agent url {raw}: {e}")))
}

/// Builds agents by substituting the node name into a URL template
pub struct HttpNodeAgents {
    template: String,
    client: reqwest::Client,
}

impl HttpNodeAgents {
    pub fn new(template: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            template: template.into(),
            client,
        }
    }

    pub fn url_for(&self, node: &str) -> String {
        self.template.replace(NODE_PLACEHOLDER, node)
    }
}

impl Default for HttpNodeAgents {
    fn default() -> Self {
        Self::new(DEFAULT_AGENT_URL_TEMPLATE, reqwest::Client::new())
    }
}

impl NodeAgentFactory for HttpNodeAgents {
    fn agent(&self, node: &str) -> Result<Arc<dyn ResourceSource>, SourceError> {
        let source = NodeAgentSource::new(node, &self.url_for(node), self.client.clone())?;
        Ok(Arc::new(source))
    }
}
