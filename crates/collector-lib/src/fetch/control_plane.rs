//! Kubernetes API server adapter

use super::{async_trait, ResourceSource};
use crate::error::SourceError;
use crate::models::{ResourceType, SourceKind};
use k8s_openapi::api::core::v1::{Node, Pod, ReplicationController, Service};
use kube::api::{Api, ListParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use tracing::{debug, info};

const CONTROL_PLANE_TYPES: &[ResourceType] = &[
    ResourceType::Node,
    ResourceType::Pod,
    ResourceType::Service,
    ResourceType::ReplicationController,
];

/// Lists cluster-scoped views of the four control-plane resource types
pub struct ControlPlaneSource {
    client: Client,
    id: String,
}

impl ControlPlaneSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            id: "control-plane".to_string(),
        }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn connect() -> Result<Self, SourceError> {
        let client = Client::try_default()
            .await
            .map_err(|e| SourceError::Unavailable(format!("kubernetes client: {e}")))?;
        info!("Connected to Kubernetes API");
        Ok(Self::new(client))
    }

    async fn list_all<K>(&self) -> Result<Vec<Value>, SourceError>
    where
        K: kube::Resource + Clone + DeserializeOwned + Serialize + Debug,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(map_kube_error)?;

        list.items
            .iter()
            .map(|item| {
                serde_json::to_value(item).map_err(|e| SourceError::InvalidResponse(e.to_string()))
            })
            .collect()
    }
}

#[async_trait]
impl ResourceSource for ControlPlaneSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::ControlPlane
    }

    fn resource_types(&self) -> &[ResourceType] {
        CONTROL_PLANE_TYPES
    }

    async fn list(&self, kind: ResourceType) -> Result<Vec<Value>, SourceError> {
        let records = match kind {
            ResourceType::Node => self.list_all::<Node>().await?,
            ResourceType::Pod => self.list_all::<Pod>().await?,
            ResourceType::Service => self.list_all::<Service>().await?,
            ResourceType::ReplicationController => {
                self.list_all::<ReplicationController>().await?
            }
            other => {
                return Err(SourceError::InvalidResponse(format!(
                    "control plane does not serve {other}"
                )))
            }
        };
        debug!(kind = %kind, count = records.len(), "Listed from control plane");
        Ok(records)
    }
}

fn map_kube_error(error: kube::Error) -> SourceError {
    match error {
        kube::Error::Api(response) => {
            SourceError::Unavailable(format!("{} ({})", response.message, response.code))
        }
        kube::Error::SerdeError(e) => SourceError::InvalidResponse(e.to_string()),
        other => SourceError::Unavailable(other.to_string()),
    }
}
