//! Collector configuration

use anyhow::{Context, Result};
use collector_lib::fetch::DEFAULT_AGENT_URL_TEMPLATE;
use collector_lib::EngineConfig;
use serde::Deserialize;
use std::time::Duration;

/// Which adapters the collector wires up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Control plane plus one agent per discovered node
    Cluster,
    /// The local node agent only
    Local,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Cluster => "cluster",
            Mode::Local => "local",
        }
    }
}

/// Collector configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,

    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for graph queries, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// How long a resource may go unreported before eviction
    #[serde(default = "default_retention")]
    pub retention_secs: u64,

    /// Bound on one source's fetch in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Agent URL with `{node}` standing for the node name
    #[serde(default = "default_agent_url_template")]
    pub agent_url_template: String,

    /// Agent queried in local mode
    #[serde(default = "default_local_agent_url")]
    pub local_agent_url: String,
}

fn default_mode() -> Mode {
    Mode::Cluster
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "localhost".to_string())
}

fn default_api_port() -> u16 {
    5555
}

fn default_refresh_interval() -> u64 {
    10
}

fn default_retention() -> u64 {
    3600
}

fn default_fetch_timeout() -> u64 {
    5
}

fn default_agent_url_template() -> String {
    DEFAULT_AGENT_URL_TEMPLATE.to_string()
}

fn default_local_agent_url() -> String {
    "http://localhost:4243/".to_string()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            node_name: default_node_name(),
            api_port: default_api_port(),
            refresh_interval_secs: default_refresh_interval(),
            retention_secs: default_retention(),
            fetch_timeout_secs: default_fetch_timeout(),
            agent_url_template: default_agent_url_template(),
            local_agent_url: default_local_agent_url(),
        }
    }
}

impl CollectorConfig {
    /// Load configuration from `COLLECTOR_*` environment variables
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("COLLECTOR").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let loaded: Self = config
            .try_deserialize()
            .context("Invalid collector configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<()> {
        if self.refresh_interval_secs == 0 {
            anyhow::bail!("refresh_interval_secs must be positive");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be positive");
        }
        if self.mode == Mode::Cluster && !self.agent_url_template.contains("{node}") {
            anyhow::bail!("agent_url_template must contain {{node}}");
        }
        Ok(())
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            retention: Duration::from_secs(self.retention_secs),
            source_timeout: Duration::from_secs(self.fetch_timeout_secs),
            ..EngineConfig::default()
        }
    }
}
