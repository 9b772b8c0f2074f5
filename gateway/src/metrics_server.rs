//! HTTP server for metrics and health
//!
//! - `/metrics` - Prometheus text format
//! - `/health` - liveness
//! - `/api/accounting/metrics` - JSON delivery snapshot
//! - `/api/accounting/metrics/health` - `HEALTHY` iff the circuit is closed
//!
//! # Example
//!
//! ```ignore
//! use acct_gateway::metrics_server::MetricsServer;
//!
//! let metrics_handle = MetricsServer::start(config.metrics_addr, Arc::clone(&delivery));
//!
//! // Later, to shutdown
//! metrics_handle.abort();
//! ```

use crate::resilience::Delivery;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Metrics HTTP server
pub struct MetricsServer;

impl MetricsServer {
    /// Start the metrics server on the given address
    ///
    /// Returns a JoinHandle that can be used to abort the server.
    pub fn start(addr: SocketAddr, delivery: Arc<Delivery>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let app = router(delivery);

            info!(%addr, "Metrics server starting");

            let listener = match tokio::net::TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(e) => {
                    error!(error = %e, %addr, "Failed to bind metrics server");
                    return;
                }
            };

            if let Err(e) = axum::serve(listener, app).await {
                error!(error = %e, "Metrics server error");
            }
        })
    }
}

/// Routes served by the metrics server
pub fn router(delivery: Arc<Delivery>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/api/accounting/metrics", get(snapshot_handler))
        .route("/api/accounting/metrics/health", get(accounting_health_handler))
        .with_state(delivery)
}

/// Handler for /metrics endpoint
async fn metrics_handler() -> impl IntoResponse {
    let body = crate::metrics::gather();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Handler for /health endpoint
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn snapshot_handler(State(delivery): State<Arc<Delivery>>) -> impl IntoResponse {
    Json(delivery.snapshot())
}

/// Always 200; the body carries HEALTHY or DEGRADED
async fn accounting_health_handler(State(delivery): State<Arc<Delivery>>) -> impl IntoResponse {
    Json(delivery.health())
}
