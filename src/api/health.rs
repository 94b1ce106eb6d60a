use std::net::SocketAddr;
use std::time::Duration;

use axum::{routing::get, Router};
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

/// Liveness/readiness endpoints for container orchestrators.
pub fn router() -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .layer(TimeoutLayer::new(Duration::from_secs(5)))
}

async fn healthz() -> &'static str {
    "OK"
}

async fn readyz() -> &'static str {
    "READY"
}

/// Serve the health endpoints until the process exits. A failing health
/// server is logged but never takes the agent down with it.
pub async fn serve(port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%port, "Health check server starting");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, "Health check server failed to bind");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, router()).await {
        error!(error = %e, "Health check server failed");
    }
}
