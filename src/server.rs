//! HTTP front door for event capture.
//!
//! Every request, whatever its method or path, gets the same answer:
//!
//! ```text
//! HTTP/1.1 200 OK
//! access-control-allow-origin: *
//! content-length: 0
//! ```
//!
//! The reply does not depend on the body. Up to `max_data_size - 1` bytes of
//! the body are read, then parsing and queueing run on a spawned task after
//! the handler has returned. Clients get no signal of parse or broker
//! failures.

use anyhow::Context;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::broker::Broker;
use crate::config::Config;
use crate::ingest::{now_timestamp, IngestService};
use crate::metrics::RelayMetrics;
use crate::queue::{QueueClient, QueueSettings};

/// Connects to the broker (blocking until it is reachable), then serves
/// capture requests until Ctrl-C.
pub async fn run_server(config: &Config, broker: Arc<dyn Broker>) -> anyhow::Result<()> {
    let metrics = Arc::new(RelayMetrics::new());
    let queue = QueueClient::connect(
        broker,
        QueueSettings::from(&config.broker),
        Arc::clone(&metrics),
    )
    .await;
    let service = Arc::new(IngestService::new(
        queue,
        &config.capture,
        Arc::clone(&metrics),
    ));

    let bind_addr = config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!(
        addr = %bind_addr,
        version = env!("CARGO_PKG_VERSION"),
        "capture server listening"
    );

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    metrics.snapshot().log("ingest");
    tracing::info!("capture server stopped");
    Ok(())
}

/// Builds the catch-all router.
pub fn router(service: Arc<IngestService>) -> Router {
    Router::new()
        .fallback(handle_capture)
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .with_state(service)
}

/// Resolves on Ctrl-C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn handle_capture(State(service): State<Arc<IngestService>>, body: Body) -> StatusCode {
    let timestamp = now_timestamp();
    let bytes = read_bounded(body, service.max_body_bytes()).await;

    tokio::spawn(async move {
        // Failures are already counted and logged by the service.
        let _ = service.ingest(&bytes, timestamp);
    });

    StatusCode::OK
}

/// Reads at most `limit` bytes of `body`, discarding the rest.
async fn read_bounded(mut body: Body, limit: usize) -> Vec<u8> {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match body.frame().await {
            Some(Ok(frame)) => {
                if let Ok(data) = frame.into_data() {
                    let take = data.len().min(limit - buf.len());
                    buf.extend_from_slice(&data[..take]);
                }
            }
            Some(Err(e)) => {
                tracing::debug!(error = %e, "request body read failed");
                break;
            }
            None => break,
        }
    }
    buf
}
