//! Fetching raw resource metadata from distributed sources
//!
//! This module provides:
//! - The [`ResourceSource`] abstraction over the control plane and node agents
//! - A [`FetchCoordinator`] that runs one bounded fan-out round per cycle
//! - Concrete adapters for the Kubernetes API and Docker-compatible node agents

mod control_plane;
mod coordinator;
mod node_agent;

#[cfg(test)]
pub(crate) mod testing;

pub use control_plane::ControlPlaneSource;
pub use coordinator::{FetchCoordinator, FetchMode, FetchReport, SourceFailure, SourceTiming};
pub use node_agent::{HttpNodeAgents, NodeAgentSource, DEFAULT_AGENT_URL_TEMPLATE};

use crate::error::SourceError;
use crate::models::{ResourceType, SourceKind};
use serde_json::Value;
use std::sync::Arc;

pub use async_trait::async_trait;

/// Uniform interface over one source of raw resource records
#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Stable identifier used for logging and cache ownership
    fn id(&self) -> &str;

    /// Which kind of source this is
    fn kind(&self) -> SourceKind;

    /// Resource types this source is asked for every cycle
    fn resource_types(&self) -> &[ResourceType];

    /// List the raw records of one type
    async fn list(&self, kind: ResourceType) -> Result<Vec<Value>, SourceError>;
}

/// Builds the agent source for a node discovered through the control plane
pub trait NodeAgentFactory: Send + Sync {
    fn agent(&self, node: &str) -> Result<Arc<dyn ResourceSource>, SourceError>;
}
