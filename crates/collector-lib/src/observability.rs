//! Observability for the context collector
//!
//! Provides:
//! - Prometheus metrics (cycle and per-source fetch latency, source failures, graph size)
//! - Structured JSON logging of lifecycle and cycle events with tracing

use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Encoder, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::models::SourceKind;

/// Histogram buckets for cycle duration (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<CollectorMetricsInner> = OnceLock::new();

struct CollectorMetricsInner {
    cycle_duration_seconds: Histogram,
    source_fetch_duration_seconds: HistogramVec,
    cycles: IntCounter,
    cycles_aborted: IntCounter,
    source_failures: IntCounterVec,
    malformed_records: IntCounter,
    skipped_edges: IntCounter,
    evicted_resources: IntCounter,
    resources: IntGauge,
    relations: IntGauge,
    graph_timestamp_seconds: IntGauge,
}

impl CollectorMetricsInner {
    fn new() -> Self {
        Self {
            cycle_duration_seconds: register_histogram!(
                "context_graph_cycle_duration_seconds",
                "Time spent in one fetch-ingest-infer-publish cycle",
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register cycle_duration_seconds"),

            source_fetch_duration_seconds: register_histogram_vec!(
                "context_graph_source_fetch_duration_seconds",
                "Time spent fetching every resource type from one source",
                &["kind"],
                CYCLE_BUCKETS.to_vec()
            )
            .expect("Failed to register source_fetch_duration_seconds"),

            cycles: register_int_counter!(
                "context_graph_cycles_total",
                "Cycles that published a snapshot"
            )
            .expect("Failed to register cycles_total"),

            cycles_aborted: register_int_counter!(
                "context_graph_cycles_aborted_total",
                "Cycles abandoned before publication"
            )
            .expect("Failed to register cycles_aborted_total"),

            source_failures: register_int_counter_vec!(
                "context_graph_source_failures_total",
                "Sources that contributed nothing to a cycle",
                &["kind"]
            )
            .expect("Failed to register source_failures_total"),

            malformed_records: register_int_counter!(
                "context_graph_malformed_records_total",
                "Raw records rejected during ingest"
            )
            .expect("Failed to register malformed_records_total"),

            skipped_edges: register_int_counter!(
                "context_graph_skipped_edges_total",
                "Inference rule applications skipped for missing fields"
            )
            .expect("Failed to register skipped_edges_total"),

            evicted_resources: register_int_counter!(
                "context_graph_evicted_resources_total",
                "Resources removed after the retention window"
            )
            .expect("Failed to register evicted_resources_total"),

            resources: register_int_gauge!(
                "context_graph_resources",
                "Resources in the current snapshot"
            )
            .expect("Failed to register resources"),

            relations: register_int_gauge!(
                "context_graph_relations",
                "Relations in the current snapshot"
            )
            .expect("Failed to register relations"),

            graph_timestamp_seconds: register_int_gauge!(
                "context_graph_timestamp_seconds",
                "Graph timestamp of the current snapshot as Unix seconds"
            )
            .expect("Failed to register timestamp_seconds"),
        }
    }
}

/// Collector metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct CollectorMetrics {
    _private: (),
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &CollectorMetricsInner {
        GLOBAL_METRICS.get_or_init(CollectorMetricsInner::new)
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner().cycle_duration_seconds.observe(duration_secs);
    }

    pub fn observe_source_fetch(&self, kind: SourceKind, duration_secs: f64) {
        self.inner()
            .source_fetch_duration_seconds
            .with_label_values(&[kind.as_str()])
            .observe(duration_secs);
    }

    pub fn inc_cycles(&self) {
        self.inner().cycles.inc();
    }

    pub fn inc_cycles_aborted(&self) {
        self.inner().cycles_aborted.inc();
    }

    pub fn add_source_failures(&self, kind: SourceKind, count: usize) {
        if count > 0 {
            self.inner()
                .source_failures
                .with_label_values(&[kind.as_str()])
                .inc_by(count as u64);
        }
    }

    pub fn add_malformed_records(&self, count: usize) {
        self.inner().malformed_records.inc_by(count as u64);
    }

    pub fn add_skipped_edges(&self, count: usize) {
        self.inner().skipped_edges.inc_by(count as u64);
    }

    pub fn add_evicted_resources(&self, count: usize) {
        self.inner().evicted_resources.inc_by(count as u64);
    }

    /// Update the gauges describing the current snapshot
    pub fn set_graph(&self, resources: usize, relations: usize, timestamp_secs: i64) {
        let inner = self.inner();
        inner.resources.set(resources as i64);
        inner.relations.set(relations as i64);
        inner.graph_timestamp_seconds.set(timestamp_secs);
    }
}

/// Render every registered metric in the text exposition format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

/// Structured logger for collector events
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, mode: &str) {
        info!(
            event = "collector_started",
            node = %self.node_name,
            collector_version = %version,
            mode = %mode,
            "Context collector started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "collector_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Context collector shutting down"
        );
    }

    pub fn log_cycle(
        &self,
        sequence: u64,
        resources: usize,
        relations: usize,
        failed_sources: usize,
        elapsed_ms: u128,
    ) {
        info!(
            event = "cycle_completed",
            node = %self.node_name,
            sequence = sequence,
            resources = resources,
            relations = relations,
            failed_sources = failed_sources,
            elapsed_ms = elapsed_ms,
            "Published context graph"
        );
    }

    pub fn log_source_failure(&self, source_id: &str, kind: SourceKind, error: &str) {
        warn!(
            event = "source_failed",
            node = %self.node_name,
            source_id = %source_id,
            kind = %kind,
            error = %error,
            "Source contributed nothing this cycle"
        );
    }

    pub fn log_cycle_aborted(&self, reason: &str) {
        warn!(
            event = "cycle_aborted",
            node = %self.node_name,
            reason = %reason,
            "Cycle aborted, previous snapshot stays current"
        );
    }
}
