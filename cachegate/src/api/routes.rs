//! HTTP handlers for the cachegate service

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use cachegate_kv::{Cache, CacheStats, HealthStatus, StoreRole};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<Cache>,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub environment: String,
    pub stores: Vec<StoreStatus>,
}

/// Routing state of one backing store
#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub name: String,
    pub role: StoreRole,
    pub backend: String,
    pub healthy: bool,
    pub consecutive_successes: u32,
    pub last_latency_ms: u64,
    pub last_probe: Option<DateTime<Utc>>,
}

/// Build the health body from the current store flags.
///
/// The service is unhealthy when the primary is; an unhealthy mirror only
/// degrades it.
pub fn health_response(cache: &Cache) -> HealthResponse {
    let stores: Vec<StoreStatus> = cache
        .router()
        .handles()
        .iter()
        .map(|handle| {
            let health = handle.health();
            let last_probe = match health.last_probe_unix_ms() {
                0 => None,
                ms => Utc.timestamp_millis_opt(ms).single(),
            };
            StoreStatus {
                name: handle.name().to_string(),
                role: handle.role(),
                backend: handle.backend().to_string(),
                healthy: handle.is_healthy(),
                consecutive_successes: health.consecutive_successes(),
                last_latency_ms: health.last_latency().as_millis() as u64,
                last_probe,
            }
        })
        .collect();

    let status = if !cache.health_monitor().primary_healthy() {
        HealthStatus::Unhealthy
    } else if stores.iter().any(|s| !s.healthy) {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: cache.ttl_registry().environment(),
        stores,
    }
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let body = health_response(&state.cache);
    let code = StatusCode::from_u16(body.status.to_http_status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (code, Json(body))
}

/// Prometheus text exposition of the cache counters
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.cache.metrics().render_prometheus() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

pub async fn stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}
