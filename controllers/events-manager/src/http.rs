//! Metrics and health probe endpoint.

use crate::error::ControllerError;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Render every metric in `registry` in the Prometheus text format.
pub fn encode_metrics(registry: &Registry) -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

async fn metrics(State(registry): State<Registry>) -> Result<String, (StatusCode, String)> {
    encode_metrics(&registry).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(registry)
        .layer(TraceLayer::new_for_http())
}

/// Serve the endpoint until `shutdown` fires.
pub async fn serve(listener: TcpListener, registry: Registry, shutdown: CancellationToken) -> Result<(), ControllerError> {
    if let Ok(address) = listener.local_addr() {
        info!(address = %address, "Metrics endpoint listening");
    }

    axum::serve(listener, router(registry))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(ControllerError::Http)
}
