//! HTTP server exposing cache health and metrics

use anyhow::Result;
use axum::{routing::get, Router};
use cachegate_kv::Cache;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::routes::{health_check, metrics, stats, AppState};

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// API server
pub struct ApiServer {
    config: ApiServerConfig,
    cache: Arc<Cache>,
}

impl ApiServer {
    /// Create a new API server over a shared cache
    pub fn new(config: ApiServerConfig, cache: Arc<Cache>) -> Self {
        Self { config, cache }
    }

    /// Build the router without binding a socket
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.cache))
    }

    /// Start the API server and run until the process exits
    pub async fn start(self) -> Result<()> {
        self.start_with_shutdown(std::future::pending()).await
    }

    /// Start the API server and stop accepting requests once `signal` resolves
    pub async fn start_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();

        let addr = format!("{}:{}", self.config.host, self.config.port);
        info!("Starting API server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await?;

        info!("API server stopped");
        Ok(())
    }
}

/// Routes for `/health`, `/metrics` and `/stats`
pub fn router(cache: Arc<Cache>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/stats", get(stats))
        .with_state(AppState { cache })
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
