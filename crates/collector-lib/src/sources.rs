//! Per-source fetch status
//!
//! Tracks when each source last contributed to a cycle, why it last
//! failed and how long its last fetch took. Written by the refresh loop
//! after each cycle, read by the API.

use crate::fetch::FetchReport;
use crate::models::SourceKind;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Latest known state of one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Failed cycles since the last success
    pub consecutive_failures: u32,
    /// Wall time of the most recent fetch, in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_elapsed_ms: Option<u64>,
}

impl SourceStatus {
    fn new(source_id: &str, kind: SourceKind) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind,
            last_success: None,
            last_failure: None,
            last_error: None,
            consecutive_failures: 0,
            last_elapsed_ms: None,
        }
    }
}

/// Registry of every source seen by the refresh loop
#[derive(Debug, Default)]
pub struct SourceRegistry {
    statuses: DashMap<String, SourceStatus>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one fetch round into the registry
    pub fn record(&self, report: &FetchReport) {
        for source_id in &report.succeeded {
            let kind = if source_id.starts_with("agent:") {
                SourceKind::NodeAgent
            } else {
                SourceKind::ControlPlane
            };
            let mut status = self
                .statuses
                .entry(source_id.clone())
                .or_insert_with(|| SourceStatus::new(source_id, kind));
            status.last_success = Some(report.observed_at);
            status.consecutive_failures = 0;
        }

        for failure in &report.failed {
            let mut status = self
                .statuses
                .entry(failure.source_id.clone())
                .or_insert_with(|| SourceStatus::new(&failure.source_id, failure.kind));
            status.last_failure = Some(report.observed_at);
            status.last_error = Some(failure.error.to_string());
            status.consecutive_failures += 1;
        }

        for timing in &report.timings {
            if let Some(mut status) = self.statuses.get_mut(&timing.source_id) {
                status.last_elapsed_ms = Some(timing.elapsed.as_millis() as u64);
            }
        }

        // Agents of nodes that left the cluster are no longer queried
        if !report.nodes.is_empty() {
            self.statuses.retain(|id, status| {
                status.kind != SourceKind::NodeAgent
                    || report
                        .nodes
                        .iter()
                        .any(|node| id.strip_prefix("agent:") == Some(node.as_str()))
            });
        }
    }

    pub fn get(&self, source_id: &str) -> Option<SourceStatus> {
        self.statuses.get(source_id).map(|s| s.clone())
    }

    /// All statuses ordered by source id
    pub fn list(&self) -> Vec<SourceStatus> {
        let mut statuses: Vec<SourceStatus> =
            self.statuses.iter().map(|s| s.value().clone()).collect();
        statuses.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        statuses
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}
