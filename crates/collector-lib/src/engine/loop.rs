//! Periodic refresh loop
//!
//! Drives [`ContextEngine`] on a fixed interval and folds each cycle's
//! outcome into health, metrics, source status and the event log.

use super::{Clock, ContextEngine, EngineConfig, SystemClock};
use crate::fetch::FetchMode;
use crate::health::HealthRegistry;
use crate::models::SourceKind;
use crate::observability::{CollectorMetrics, StructuredLogger};
use crate::snapshot::{GraphSnapshot, SnapshotPublisher};
use crate::sources::SourceRegistry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

/// Runs one cycle per tick until shut down
pub struct RefreshLoop {
    engine: ContextEngine,
    interval: Duration,
    health: HealthRegistry,
    sources: Arc<SourceRegistry>,
    metrics: CollectorMetrics,
    logger: StructuredLogger,
}

impl RefreshLoop {
    pub fn publisher(&self) -> Arc<SnapshotPublisher> {
        self.engine.publisher()
    }

    pub fn sources(&self) -> Arc<SourceRegistry> {
        Arc::clone(&self.sources)
    }

    /// Run until a shutdown signal arrives
    ///
    /// A slow cycle delays the next tick instead of queueing a burst, so
    /// cycles never overlap.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting refresh loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down refresh loop");
                    break;
                }
            }
        }
    }

    /// Run one cycle and record its outcome; `None` if it was aborted
    pub async fn tick(&mut self) -> Option<Arc<GraphSnapshot>> {
        let start = Instant::now();

        let report = match self.engine.run_cycle().await {
            Ok(report) => report,
            Err(e) => {
                self.metrics.inc_cycles_aborted();
                self.logger.log_cycle_aborted(&e.to_string());
                self.health.record_abort(e.to_string()).await;
                return None;
            }
        };

        let elapsed = start.elapsed();
        let snapshot = &report.snapshot;

        self.metrics.observe_cycle_duration(elapsed.as_secs_f64());
        self.metrics.inc_cycles();
        for kind in [SourceKind::ControlPlane, SourceKind::NodeAgent] {
            self.metrics
                .add_source_failures(kind, report.fetch.failures_of(kind));
        }
        self.metrics
            .add_malformed_records(report.fetch.ingest.rejected());
        self.metrics.add_skipped_edges(report.skipped_edges);
        self.metrics.add_evicted_resources(report.evicted);
        self.metrics.set_graph(
            snapshot.resources.len(),
            snapshot.relations.len(),
            snapshot.timestamp.timestamp(),
        );

        for timing in &report.fetch.timings {
            self.metrics
                .observe_source_fetch(timing.kind, timing.elapsed.as_secs_f64());
        }

        for failure in &report.fetch.failed {
            self.logger
                .log_source_failure(&failure.source_id, failure.kind, &failure.error.to_string());
        }

        self.sources.record(&report.fetch);
        self.health.record_cycle(&report.fetch).await;
        self.health.set_ready(true).await;

        self.logger.log_cycle(
            snapshot.sequence,
            snapshot.resources.len(),
            snapshot.relations.len(),
            report.fetch.failed.len(),
            elapsed.as_millis(),
        );

        Some(report.snapshot)
    }
}

/// Builder for creating the refresh loop
pub struct RefreshLoopBuilder {
    mode: Option<FetchMode>,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    health: HealthRegistry,
    sources: Arc<SourceRegistry>,
    node_name: String,
}

impl RefreshLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            mode: None,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            health: HealthRegistry::new(),
            sources: Arc::new(SourceRegistry::new()),
            node_name: "localhost".to_string(),
        }
    }

    /// Set the active adapters
    pub fn mode(mut self, mode: FetchMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Replace the whole engine configuration
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.refresh_interval = interval;
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn source_timeout(mut self, timeout: Duration) -> Self {
        self.config.source_timeout = timeout;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share a health registry with the API
    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn sources(mut self, sources: Arc<SourceRegistry>) -> Self {
        self.sources = sources;
        self
    }

    /// Node name attached to structured log events
    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    /// Build the refresh loop
    pub fn build(self) -> Result<RefreshLoop> {
        let mode = self
            .mode
            .ok_or_else(|| anyhow::anyhow!("Fetch mode is required"))?;
        if self.config.refresh_interval.is_zero() {
            anyhow::bail!("Refresh interval must be positive");
        }

        Ok(RefreshLoop {
            engine: ContextEngine::with_clock(mode, &self.config, self.clock),
            interval: self.config.refresh_interval,
            health: self.health,
            sources: self.sources,
            metrics: CollectorMetrics::new(),
            logger: StructuredLogger::new(self.node_name),
        })
    }
}

impl Default for RefreshLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
