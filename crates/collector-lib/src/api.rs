//! HTTP API for graph queries, health checks and Prometheus metrics

use crate::health::{ComponentStatus, HealthRegistry};
use crate::models::ResourceType;
use crate::observability::encode_metrics;
use crate::query::GraphQuery;
use crate::sources::SourceRegistry;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub query: GraphQuery,
    pub health_registry: HealthRegistry,
    pub sources: Arc<SourceRegistry>,
}

impl AppState {
    pub fn new(
        query: GraphQuery,
        health_registry: HealthRegistry,
        sources: Arc<SourceRegistry>,
    ) -> Self {
        Self {
            query,
            health_registry,
            sources,
        }
    }
}

/// Serialize without cloning the snapshot behind an `Arc`
fn json_body<T: Serialize + ?Sized>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// The whole current graph
async fn cluster(State(state): State<Arc<AppState>>) -> Response {
    json_body(state.query.graph().as_ref())
}

/// Current resources of one type; unknown types are 404
async fn resources(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> Response {
    match kind.parse::<ResourceType>() {
        Ok(kind) => json_body(&state.query.resources_by_type(kind)),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// Graphviz rendering of the current graph
async fn debug(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.query.debug_graph(),
    )
}

/// Fetch status of every known source
async fn sources(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.sources.list())
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still serving the last snapshot
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once a snapshot has been published
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    match encode_metrics() {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            text,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/cluster", get(cluster))
        .route("/cluster/resources/:type", get(resources))
        .route("/debug", get(debug))
        .route("/sources", get(sources))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
