//! One fetch round per cycle
//!
//! Cluster mode works in two dependent steps: the control plane is read
//! first, its Node list names the agents to query, and then every agent is
//! queried concurrently. Each source is bounded by its own timeout and
//! succeeds or fails independently; the round itself never fails. The
//! wall time of every source fetch is recorded in the report.

use super::{NodeAgentFactory, ResourceSource};
use crate::cache::{IngestStats, ResourceCache};
use crate::error::SourceError;
use crate::models::{ResourceType, SourceKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Which adapters are active
#[derive(Clone)]
pub enum FetchMode {
    /// Control plane plus one agent per discovered node
    Cluster {
        control_plane: Arc<dyn ResourceSource>,
        agents: Arc<dyn NodeAgentFactory>,
    },
    /// A single local agent and no control plane
    Local { agent: Arc<dyn ResourceSource> },
}

/// A source that contributed nothing this cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_id: String,
    pub kind: SourceKind,
    pub error: SourceError,
}

/// How long one source fetch took, successful or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTiming {
    pub source_id: String,
    pub kind: SourceKind,
    pub elapsed: Duration,
}

/// Outcome of one fetch round
#[derive(Debug, Clone)]
pub struct FetchReport {
    /// Start of the round; every record ingested in it carries this instant
    pub observed_at: DateTime<Utc>,
    pub succeeded: Vec<String>,
    pub failed: Vec<SourceFailure>,
    /// One entry per source that was actually queried
    pub timings: Vec<SourceTiming>,
    pub ingest: IngestStats,
    /// Nodes whose agents were queried
    pub nodes: Vec<String>,
}

impl FetchReport {
    fn new(observed_at: DateTime<Utc>) -> Self {
        Self {
            observed_at,
            succeeded: Vec::new(),
            failed: Vec::new(),
            timings: Vec::new(),
            ingest: IngestStats::default(),
            nodes: Vec::new(),
        }
    }

    /// Number of failed sources of one kind
    pub fn failures_of(&self, kind: SourceKind) -> usize {
        self.failed.iter().filter(|f| f.kind == kind).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Fetch time of one source, if it was queried this round
    pub fn elapsed_of(&self, source_id: &str) -> Option<Duration> {
        self.timings
            .iter()
            .find(|t| t.source_id == source_id)
            .map(|t| t.elapsed)
    }

    fn absorb(
        &mut self,
        cache: &mut ResourceCache,
        source: &dyn ResourceSource,
        fetched: Fetched,
    ) {
        let Fetched { result, elapsed } = fetched;
        self.timings.push(SourceTiming {
            source_id: source.id().to_string(),
            kind: source.kind(),
            elapsed,
        });

        match result {
            Ok(lists) => {
                for (kind, records) in &lists {
                    let stats =
                        cache.ingest(source.id(), source.kind(), *kind, records, self.observed_at);
                    self.ingest.merge(&stats);
                }
                debug!(source_id = %source.id(), elapsed_ms = elapsed.as_millis(), "Source fetched");
                self.succeeded.push(source.id().to_string());
            }
            Err(error) => {
                warn!(source_id = %source.id(), error = %error, "Source fetch failed");
                self.failed.push(SourceFailure {
                    source_id: source.id().to_string(),
                    kind: source.kind(),
                    error,
                });
            }
        }
    }
}

/// Runs the per-cycle fan-out over all configured sources
pub struct FetchCoordinator {
    mode: FetchMode,
    timeout: Duration,
    /// Nodes from the most recent successful control-plane fetch
    known_nodes: Vec<String>,
    agents: HashMap<String, Arc<dyn ResourceSource>>,
}

impl FetchCoordinator {
    pub fn new(mode: FetchMode, per_source_timeout: Duration) -> Self {
        Self {
            mode,
            timeout: per_source_timeout,
            known_nodes: Vec::new(),
            agents: HashMap::new(),
        }
    }

    pub fn known_nodes(&self) -> &[String] {
        &self.known_nodes
    }

    /// Fetch every source once and ingest each successful result
    pub async fn run_cycle(
        &mut self,
        cache: &mut ResourceCache,
        observed_at: DateTime<Utc>,
    ) -> FetchReport {
        let mut report = FetchReport::new(observed_at);

        let agents = match self.mode.clone() {
            FetchMode::Local { agent } => vec![agent],
            FetchMode::Cluster {
                control_plane,
                agents,
            } => {
                let fetched = fetch_lists(control_plane.as_ref(), self.timeout).await;
                if let Ok(lists) = &fetched.result {
                    self.known_nodes = discover_nodes(lists);
                }
                report.absorb(cache, control_plane.as_ref(), fetched);
                self.resolve_agents(agents.as_ref(), &mut report)
            }
        };

        let tasks: Vec<_> = agents
            .into_iter()
            .map(|agent| {
                let timeout = self.timeout;
                let task_agent = Arc::clone(&agent);
                let handle =
                    tokio::spawn(async move { fetch_lists(task_agent.as_ref(), timeout).await });
                (agent, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(tasks.len());
        for (agent, handle) in tasks {
            let fetched = match handle.await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(source_id = %agent.id(), error = %e, "Agent fetch task did not complete");
                    Fetched {
                        result: Err(SourceError::Unavailable(format!("fetch task failed: {e}"))),
                        elapsed: Duration::ZERO,
                    }
                }
            };
            outcomes.push((agent, fetched));
        }

        // Ingest in a stable order regardless of completion order
        outcomes.sort_by(|a, b| a.0.id().cmp(b.0.id()));
        for (agent, fetched) in outcomes {
            report.absorb(cache, agent.as_ref(), fetched);
        }

        report
    }

    /// Agent sources for the known nodes, building any that are new
    fn resolve_agents(
        &mut self,
        factory: &dyn NodeAgentFactory,
        report: &mut FetchReport,
    ) -> Vec<Arc<dyn ResourceSource>> {
        let known_nodes = &self.known_nodes;
        self.agents.retain(|node, _| known_nodes.contains(node));

        let mut resolved = Vec::with_capacity(self.known_nodes.len());
        for node in &self.known_nodes {
            if let Some(agent) = self.agents.get(node) {
                resolved.push(Arc::clone(agent));
                continue;
            }
            match factory.agent(node) {
                Ok(agent) => {
                    self.agents.insert(node.clone(), Arc::clone(&agent));
                    resolved.push(agent);
                }
                Err(error) => {
                    warn!(node = %node, error = %error, "Cannot build node agent");
                    report.failed.push(SourceFailure {
                        source_id: format!("agent:{node}"),
                        kind: SourceKind::NodeAgent,
                        error,
                    });
                }
            }
        }

        report.nodes = self.known_nodes.clone();
        resolved
    }
}

/// Result of one source fetch and the time it took
struct Fetched {
    result: Result<Vec<(ResourceType, Vec<Value>)>, SourceError>,
    elapsed: Duration,
}

/// List every type a source provides, bounded by one timeout for the whole source
async fn fetch_lists(source: &dyn ResourceSource, timeout: Duration) -> Fetched {
    let start = Instant::now();
    let work = async {
        let mut lists = Vec::with_capacity(source.resource_types().len());
        for &kind in source.resource_types() {
            lists.push((kind, source.list(kind).await?));
        }
        Ok::<_, SourceError>(lists)
    };

    let result = match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout)),
    };
    Fetched {
        result,
        elapsed: start.elapsed(),
    }
}

fn discover_nodes(lists: &[(ResourceType, Vec<Value>)]) -> Vec<String> {
    let mut nodes: Vec<String> = lists
        .iter()
        .filter(|(kind, _)| *kind == ResourceType::Node)
        .flat_map(|(_, records)| records.iter())
        .filter_map(|record| record.pointer("/metadata/name").and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    nodes.sort();
    nodes.dedup();
    nodes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_RETENTION;
    use crate::fetch::testing::{container, node, pod, FakeAgents, FakeSource};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn cluster(control_plane: &Arc<FakeSource>, agents: &Arc<FakeAgents>) -> FetchMode {
        FetchMode::Cluster {
            control_plane: control_plane.clone(),
            agents: agents.clone(),
        }
    }

    #[tokio::test]
    async fn test_cluster_round_discovers_nodes_and_fetches_agents() {
        let control_plane = Arc::new(FakeSource::control_plane());
        control_plane.set(ResourceType::Node, vec![node("n1"), node("n2")]);
        control_plane.set(ResourceType::Pod, vec![pod("p1", "n1", &[])]);

        let agents = Arc::new(FakeAgents::default());
        agents.source("n1").set(ResourceType::Container, vec![container("c1", "p1")]);
        agents.source("n2").set(ResourceType::Container, vec![container("c2", "p1")]);

        let mut coordinator = FetchCoordinator::new(cluster(&control_plane, &agents), Duration::from_secs(1));
        let mut cache = ResourceCache::new(DEFAULT_RETENTION);

        let report = coordinator.run_cycle(&mut cache, at(0)).await;

        assert!(report.is_clean());
        assert_eq!(report.nodes, vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(report.succeeded, vec!["control-plane", "agent:n1", "agent:n2"]);
        assert_eq!(report.ingest.inserted, 5);
        assert_eq!(report.observed_at, at(0));
        assert_eq!(cache.len(), 5);
    }

    #[tokio::test]
    async fn test_failed_source_is_recorded_not_fatal() {
        let control_plane = Arc::new(FakeSource::control_plane());
        control_plane.set(ResourceType::Node, vec![node("n1"), node("n2")]);

        let agents = Arc::new(FakeAgents::default());
        agents.source("n1").set(ResourceType::Container, vec![container("c1", "p1")]);
        agents.source("n2").fail_with(SourceError::Unavailable("connection refused".into()));

        let mut coordinator = FetchCoordinator::new(cluster(&control_plane, &agents), Duration::from_secs(1));
        let mut cache = ResourceCache::new(DEFAULT_RETENTION);

        let report = coordinator.run_cycle(&mut cache, at(0)).await;

        assert_eq!(report.failures_of(SourceKind::NodeAgent), 1);
        assert_eq!(report.failed[0].source_id, "agent:n2");
        assert!(cache.get(ResourceType::Container, "c1").is_some());
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let agent = Arc::new(FakeSource::agent("n1"));
        agent.set(ResourceType::Container, vec![container("c1", "p1")]);
        agent.delay(Duration::from_secs(5));

        let mut coordinator = FetchCoordinator::new(
            FetchMode::Local { agent: agent.clone() },
            Duration::from_millis(50),
        );
        let mut cache = ResourceCache::new(DEFAULT_RETENTION);

        let report = coordinator.run_cycle(&mut cache, at(0)).await;

        assert_eq!(
            report.failed[0].error,
            SourceError::Timeout(Duration::from_millis(50))
        );
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_known_nodes_survive_control_plane_outage() {
        let control_plane = Arc::new(FakeSource::control_plane());
        control_plane.set(ResourceType::Node, vec![node("n1")]);
        let agents = Arc::new(FakeAgents::default());
        agents.source("n1");

        let mut coordinator = FetchCoordinator::new(cluster(&control_plane, &agents), Duration::from_secs(1));
        let mut cache = ResourceCache::new(DEFAULT_RETENTION);
        coordinator.run_cycle(&mut cache, at(0)).await;

        control_plane.fail_with(SourceError::Unavailable("apiserver down".into()));
        let report = coordinator.run_cycle(&mut cache, at(10)).await;

        assert_eq!(report.failures_of(SourceKind::ControlPlane), 1);
        assert_eq!(coordinator.known_nodes(), ["n1".to_string()]);
        assert_eq!(report.succeeded, vec!["agent:n1"]);
    }

    #[tokio::test]
    async fn test_unbuildable_agent_counts_as_failure() {
        let control_plane = Arc::new(FakeSource::control_plane());
        control_plane.set(ResourceType::Node, vec![node("n1"), node("bad")]);
        let agents = Arc::new(FakeAgents::default());
        agents.source("n1");
        agents.refuse("bad");

        let mut coordinator = FetchCoordinator::new(cluster(&control_plane, &agents), Duration::from_secs(1));
        let mut cache = ResourceCache::new(DEFAULT_RETENTION);
        let report = coordinator.run_cycle(&mut cache, at(0)).await;

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].source_id, "agent:bad");
        // Never queried, so never timed
        assert!(report.elapsed_of("agent:bad").is_none());
    }

    #[tokio::test]
    async fn test_every_queried_source_is_timed() {
        let control_plane = Arc::new(FakeSource::control_plane());
        control_plane.set(ResourceType::Node, vec![node("n1"), node("n2")]);
        let agents = Arc::new(FakeAgents::default());
        agents.source("n1").delay(Duration::from_millis(30));
        agents.source("n2").delay(Duration::from_secs(5));

        let mut coordinator = FetchCoordinator::new(cluster(&control_plane, &agents), Duration::from_millis(200));
        let mut cache = ResourceCache::new(DEFAULT_RETENTION);
        let report = coordinator.run_cycle(&mut cache, at(0)).await;

        assert_eq!(report.timings.len(), 3);
        assert!(report.elapsed_of("control-plane").is_some());
        // Three lists, each delayed
        assert!(report.elapsed_of("agent:n1").unwrap() >= Duration::from_millis(90));
        // The timed-out agent is timed up to its deadline
        let slow = report.elapsed_of("agent:n2").unwrap();
        assert!(slow >= Duration::from_millis(200));
        assert!(slow < Duration::from_secs(5));
        assert_eq!(report.timings[2].kind, SourceKind::NodeAgent);
    }

    #[tokio::test]
    async fn test_panicking_agent_is_recorded_as_failure() {
        let control_plane = Arc::new(FakeSource::control_plane());
        control_plane.set(ResourceType::Node, vec![node("n1"), node("n2")]);
        let agents = Arc::new(FakeAgents::default());
        agents.source("n1").set(ResourceType::Container, vec![container("c1", "p1")]);
        agents.source("n2").panic_on_list();

        let mut coordinator = FetchCoordinator::new(cluster(&control_plane, &agents), Duration::from_secs(1));
        let mut cache = ResourceCache::new(DEFAULT_RETENTION);
        let report = coordinator.run_cycle(&mut cache, at(0)).await;

        assert_eq!(report.succeeded, vec!["control-plane", "agent:n1"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].source_id, "agent:n2");
        assert!(matches!(report.failed[0].error, SourceError::Unavailable(_)));
        assert!(cache.get(ResourceType::Container, "c1").is_some());
    }

    #[tokio::test]
    async fn test_recovered_control_plane_refreshes_node_list() {
        let control_plane = Arc::new(FakeSource::control_plane());
        control_plane.set(ResourceType::Node, vec![node("n1")]);
        let agents = Arc::new(FakeAgents::default());

        let mut coordinator = FetchCoordinator::new(cluster(&control_plane, &agents), Duration::from_secs(1));
        let mut cache = ResourceCache::new(DEFAULT_RETENTION);
        coordinator.run_cycle(&mut cache, at(0)).await;

        control_plane.fail_with(SourceError::Unavailable("apiserver down".into()));
        control_plane.set(ResourceType::Node, vec![node("n1"), node("n2")]);
        coordinator.run_cycle(&mut cache, at(10)).await;
        assert_eq!(coordinator.known_nodes(), ["n1".to_string()]);

        control_plane.recover();
        let report = coordinator.run_cycle(&mut cache, at(20)).await;

        assert!(report.is_clean());
        assert_eq!(coordinator.known_nodes(), ["n1".to_string(), "n2".to_string()]);
        assert_eq!(report.succeeded, vec!["control-plane", "agent:n1", "agent:n2"]);
    }
}
