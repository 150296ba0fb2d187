//! Context graph collector library
//!
//! This crate provides the core functionality for:
//! - Fetching resource metadata from the control plane and node agents
//! - A timestamp-stable resource cache with retention-based eviction
//! - Relationship inference over the current resource set
//! - Atomic snapshot publication and the query API
//! - Health checks and observability

pub mod api;
pub mod cache;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod health;
pub mod inference;
pub mod models;
pub mod observability;
pub mod query;
pub mod schema;
pub mod snapshot;
pub mod sources;

pub use engine::{ContextEngine, EngineConfig, RefreshLoop, RefreshLoopBuilder};
pub use error::{EngineError, RecordError, SourceError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{CollectorMetrics, StructuredLogger};
pub use query::GraphQuery;
pub use snapshot::{GraphSnapshot, SnapshotPublisher};
