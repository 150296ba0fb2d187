//! API client for the context collector

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// API client for the collector's query endpoints
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    async fn send(&self, path: &str) -> Result<reqwest::Response> {
        let url = self.base_url.join(path).context("Invalid path")?;

        self.client
            .get(url)
            .send()
            .await
            .context("Failed to send request")
    }

    /// Make a GET request and decode a JSON body
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(path).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    /// Make a GET request and return the body as text
    pub async fn get_text(&self, path: &str) -> Result<String> {
        let response = self.send(path).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.text().await.context("Failed to read response")
    }

    pub async fn graph(&self) -> Result<Graph> {
        self.get("cluster").await
    }

    pub async fn resources(&self, kind: &str) -> Result<ResourceList> {
        self.get(&format!("cluster/resources/{}", kind)).await
    }

    pub async fn dot(&self) -> Result<String> {
        self.get_text("debug").await
    }

    pub async fn sources(&self) -> Result<Vec<SourceStatus>> {
        self.get("sources").await
    }

    /// Health is reported with a 503 when unhealthy, so that body is decoded too
    pub async fn health(&self) -> Result<HealthResponse> {
        let response = self.send("healthz").await?;
        let status = response.status();

        if status.is_success() || status == StatusCode::SERVICE_UNAVAILABLE {
            response.json().await.context("Failed to parse response")
        } else {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body)
        }
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceView {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    #[serde(default)]
    pub properties: serde_json::Value,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ResourceView {
    pub fn label(&self) -> &str {
        self.annotations
            .get("label")
            .map(String::as_str)
            .unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationView {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Graph {
    pub timestamp: String,
    pub resources: Vec<ResourceView>,
    pub relations: Vec<RelationView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceList {
    pub timestamp: String,
    pub resources: Vec<ResourceView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: BTreeMap<String, ComponentHealth>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub kind: String,
    #[serde(default)]
    pub last_success: Option<String>,
    #[serde(default)]
    pub last_failure: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    #[serde(default)]
    pub last_elapsed_ms: Option<u64>,
}
