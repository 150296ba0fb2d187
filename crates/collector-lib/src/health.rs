//! Collector health for liveness and readiness probes
//!
//! The refresh loop folds every cycle into three components: the loop
//! itself, the control plane and the node agents as a group. A failed
//! source only degrades its component, because the previous contribution
//! stays cached; only an aborted cycle makes the collector unhealthy.

use crate::fetch::FetchReport;
use crate::models::SourceKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Some sources failed; their cached data is still served
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn new(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Body of `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// The worst status among the components
    fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            });
        Self { status, components }
    }
}

/// Body of `GET /readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const REFRESH_LOOP: &str = "refresh_loop";
    pub const CONTROL_PLANE: &str = "control_plane";
    pub const NODE_AGENTS: &str = "node_agents";
}

/// Shared between the refresh loop, which writes it, and the API
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn set(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        self.components
            .write()
            .await
            .insert(name.to_string(), ComponentHealth::new(status, message));
    }

    /// Register every component as healthy
    pub async fn register_all(&self) {
        for name in [
            components::REFRESH_LOOP,
            components::CONTROL_PLANE,
            components::NODE_AGENTS,
        ] {
            self.set(name, ComponentStatus::Healthy, None).await;
        }
    }

    /// Fold the outcome of a published cycle into component health
    pub async fn record_cycle(&self, report: &FetchReport) {
        self.set(components::REFRESH_LOOP, ComponentStatus::Healthy, None)
            .await;

        match report
            .failed
            .iter()
            .find(|f| f.kind == SourceKind::ControlPlane)
        {
            Some(failure) => {
                self.set(
                    components::CONTROL_PLANE,
                    ComponentStatus::Degraded,
                    Some(failure.error.to_string()),
                )
                .await
            }
            None => {
                self.set(components::CONTROL_PLANE, ComponentStatus::Healthy, None)
                    .await
            }
        }

        let (status, message) = match report.failures_of(SourceKind::NodeAgent) {
            0 => (ComponentStatus::Healthy, None),
            failed => (
                ComponentStatus::Degraded,
                Some(format!("{failed} node agent(s) failed")),
            ),
        };
        self.set(components::NODE_AGENTS, status, message).await;
    }

    /// Record a cycle that was abandoned before publication
    pub async fn record_abort(&self, reason: impl Into<String>) {
        self.set(
            components::REFRESH_LOOP,
            ComponentStatus::Unhealthy,
            Some(reason.into()),
        )
        .await;
    }

    /// Set once the first snapshot has been published
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse::from_components(self.components.read().await.clone())
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let reason = if !*self.ready.read().await {
            Some("No snapshot published yet")
        } else if self.health().await.status == ComponentStatus::Unhealthy {
            Some("Refresh loop unhealthy")
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::IngestStats;
    use crate::error::SourceError;
    use crate::fetch::SourceFailure;
    use chrono::Utc;

    fn report(failed: Vec<SourceFailure>) -> FetchReport {
        FetchReport {
            observed_at: Utc::now(),
            succeeded: Vec::new(),
            failed,
            timings: Vec::new(),
            ingest: IngestStats::default(),
            nodes: Vec::new(),
        }
    }

    fn failure(source_id: &str, kind: SourceKind) -> SourceFailure {
        SourceFailure {
            source_id: source_id.to_string(),
            kind,
            error: SourceError::Unavailable("connection refused".to_string()),
        }
    }

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_register_all_components() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let health = registry.health().await;
        assert_eq!(health.components.len(), 3);
        assert_eq!(
            health.components[components::REFRESH_LOOP].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_failed_agents_degrade_node_agents() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        registry
            .record_cycle(&report(vec![
                failure("agent:n1", SourceKind::NodeAgent),
                failure("agent:n2", SourceKind::NodeAgent),
            ]))
            .await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        let agents = &health.components[components::NODE_AGENTS];
        assert_eq!(agents.status, ComponentStatus::Degraded);
        assert_eq!(agents.message.as_deref(), Some("2 node agent(s) failed"));
        assert_eq!(
            health.components[components::CONTROL_PLANE].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_clean_cycle_restores_health() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        registry
            .record_cycle(&report(vec![failure("control-plane", SourceKind::ControlPlane)]))
            .await;
        assert_eq!(registry.health().await.status, ComponentStatus::Degraded);

        registry.record_cycle(&report(vec![])).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_aborted_cycle_is_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry.set_ready(true).await;

        registry.record_abort("snapshot swap failed").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert!(!registry.readiness().await.ready);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_unhealthy_wins_over_degraded() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry
            .record_cycle(&report(vec![failure("agent:n1", SourceKind::NodeAgent)]))
            .await;
        registry.record_abort("snapshot swap failed").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert_eq!(
            health.components[components::REFRESH_LOOP].message.as_deref(),
            Some("snapshot swap failed")
        );
    }

    #[tokio::test]
    async fn test_readiness_ready_when_set() {
        let registry = HealthRegistry::new();
        registry.set_ready(true).await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
    }
}
