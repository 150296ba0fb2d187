//! The aggregation engine
//!
//! [`ContextEngine`] owns every piece of cross-cycle state: the resource
//! cache, the relation first-seen map and the known node list. One call to
//! [`ContextEngine::run_cycle`] performs fetch, ingest, eviction, inference
//! and publication in that order. [`RefreshLoop`] drives it on a fixed
//! interval; readers only ever touch the [`SnapshotPublisher`].

mod clock;
mod r#loop;


pub use clock::{Clock, ManualClock, SystemClock};
pub use r#loop::{RefreshLoop, RefreshLoopBuilder};

use crate::cache::{ResourceCache, DEFAULT_RETENTION, VOLATILE_FIELDS};
use crate::error::EngineError;
use crate::fetch::{FetchCoordinator, FetchMode, FetchReport};
use crate::inference::RelationInferrer;
use crate::snapshot::{GraphSnapshot, SnapshotPublisher};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Values the engine receives from its owner
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Time between cycle starts (default: 10 seconds)
    pub refresh_interval: Duration,
    /// How long an unreported resource is kept (default: 1 hour)
    pub retention: Duration,
    /// Bound on one source's whole fetch (default: 5 seconds)
    pub source_timeout: Duration,
    /// Property names ignored when hashing content
    pub volatile_fields: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(10),
            retention: DEFAULT_RETENTION,
            source_timeout: Duration::from_secs(5),
            volatile_fields: VOLATILE_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// What one published cycle did
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub fetch: FetchReport,
    pub evicted: usize,
    pub skipped_edges: usize,
    pub snapshot: Arc<GraphSnapshot>,
}

/// Single owner of the cache, the relation stability map and the publisher
pub struct ContextEngine {
    cache: ResourceCache,
    coordinator: FetchCoordinator,
    inferrer: RelationInferrer,
    publisher: Arc<SnapshotPublisher>,
    clock: Arc<dyn Clock>,
    last_observed: Option<DateTime<Utc>>,
}

impl ContextEngine {
    /// Create an engine running on wall-clock time
    pub fn new(mode: FetchMode, config: &EngineConfig) -> Self {
        Self::with_clock(mode, config, Arc::new(SystemClock))
    }

    pub fn with_clock(mode: FetchMode, config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: ResourceCache::with_volatile_fields(
                config.retention,
                config.volatile_fields.clone(),
            ),
            coordinator: FetchCoordinator::new(mode, config.source_timeout),
            inferrer: RelationInferrer::new(),
            publisher: Arc::new(SnapshotPublisher::new()),
            clock,
            last_observed: None,
        }
    }

    /// Handle for readers; shares the engine's publisher
    pub fn publisher(&self) -> Arc<SnapshotPublisher> {
        Arc::clone(&self.publisher)
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Run one fetch-ingest-infer-publish cycle
    ///
    /// A clock that moved behind the previous cycle's start is held at that
    /// instant, so every cycle still publishes and no timestamp regresses.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, EngineError> {
        let now = self.clock.now();
        let observed_at = match self.last_observed {
            Some(previous) if now < previous => {
                warn!(
                    previous = %previous.to_rfc3339(),
                    now = %now.to_rfc3339(),
                    "Clock moved backwards, holding cycle instant"
                );
                previous
            }
            _ => now,
        };

        let fetch = self.coordinator.run_cycle(&mut self.cache, observed_at).await;
        let evicted = self.cache.evict_expired(observed_at);

        let resources = self.cache.current_resources();
        let inference = self.inferrer.infer(&resources, observed_at);
        let skipped_edges = inference.skipped;

        let snapshot = self
            .publisher
            .publish(resources, inference.relations, observed_at);
        self.last_observed = Some(observed_at);

        debug!(
            sequence = snapshot.sequence,
            evicted = evicted,
            skipped_edges = skipped_edges,
            "Cycle complete"
        );

        Ok(CycleReport {
            fetch,
            evicted,
            skipped_edges,
            snapshot,
        })
    }
}
