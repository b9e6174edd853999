//! HTTP API for health checks, Prometheus metrics and the service mesh graph

use crate::config::ServerConfig;
use axum::{
    extract::{MatchedPath, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use meshscope_lib::{
    health::{ComponentStatus, HealthRegistry},
    mesh::MeshGraph,
    observability::HttpMetrics,
    MeshNodeResponse, MeshResponse,
};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

/// Data older than this is refreshed on `force_update`
const FORCE_UPDATE_MAX_AGE: Duration = Duration::from_secs(60);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub registry: Registry,
    pub http_metrics: HttpMetrics,
    pub mesh: Arc<MeshGraph>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        registry: Registry,
        http_metrics: HttpMetrics,
        mesh: Arc<MeshGraph>,
    ) -> Self {
        Self {
            health_registry,
            registry,
            http_metrics,
            mesh,
        }
    }
}

/// Errors returned by the mesh endpoints
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message).into_response(),
            ApiError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": message })),
            )
                .into_response(),
        }
    }
}

/// Health check response - returns 200 if healthy or degraded, 503 if unhealthy
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 once the resource store is seeded
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
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    (
        StatusCode::OK,
        [("content-type", encoder.format_type().to_string())],
        buffer,
    )
        .into_response()
}

#[derive(Debug, Default, Deserialize)]
struct MeshQuery {
    #[serde(default)]
    force_update: bool,
}

/// All graph nodes, optionally refreshing stale data first
async fn get_mesh(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MeshQuery>,
) -> Result<Json<MeshResponse>, ApiError> {
    if query.force_update {
        state
            .mesh
            .refresh_if_stale(FORCE_UPDATE_MAX_AGE)
            .await
            .map_err(|e| ApiError::Internal(format!("error update data / {}", e)))?;
    }

    Ok(Json(MeshResponse {
        nodes: state.mesh.all_nodes().await,
        last_updated: state.mesh.since_last_updated().await,
    }))
}

/// One graph node by workload name
async fn get_mesh_node(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MeshNodeResponse>, ApiError> {
    let node = state.mesh.get_node(&name).await.ok_or_else(|| {
        ApiError::NotFound(format!("not found any node with name: {}", name))
    })?;

    Ok(Json(MeshNodeResponse {
        node,
        last_updated: state.mesh.since_last_updated().await,
    }))
}

/// Record request latency and log one line per request
async fn track_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let uri = request.uri().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();
    state
        .http_metrics
        .observe_request(status, &path, latency.as_secs_f64());

    info!(
        method = %method,
        status = status,
        uri = %uri,
        latency_ms = latency.as_secs_f64() * 1000.0,
        "Handled request"
    );

    response
}

/// Create the API router
pub fn create_router(state: Arc<AppState>, cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/public/mesh", get(get_mesh))
        .route("/v1/public/mesh/:name", get(get_mesh_node))
        .layer(middleware::from_fn_with_state(state.clone(), track_requests))
        .with_state(state);

    if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    }
}

/// Start the API server; returns once `cancel` fires and in-flight requests
/// drained (or the grace period ran out)
pub async fn serve(
    config: &ServerConfig,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = create_router(state, config.cors);

    let addr = format!("0.0.0.0:{}", config.port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .into_future();

    let grace = Duration::from_secs(config.graceful_seconds);
    tokio::select! {
        result = server => result?,
        _ = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(grace_secs = grace.as_secs(), "Graceful shutdown timed out");
        }
    }

    info!("API server stopped");
    Ok(())
}
