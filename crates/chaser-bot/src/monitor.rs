//! `/health` and `/metrics` endpoint.

use crate::error::AppResult;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chaser_telemetry::Metrics;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// State shared with the handlers.
#[derive(Clone)]
pub struct MonitorState {
    started: Instant,
    accounts: Arc<AtomicUsize>,
}

impl MonitorState {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            accounts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of accounts with running connections.
    pub fn set_accounts(&self, n: usize) {
        self.accounts.store(n, Ordering::Relaxed);
    }
}

impl Default for MonitorState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    accounts: usize,
}

pub fn create_router(state: MonitorState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health(State(state): State<MonitorState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: state.started.elapsed().as_secs(),
        accounts: state.accounts.load(Ordering::Relaxed),
    })
}

async fn metrics() -> Response {
    match Metrics::render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: MonitorState,
    shutdown: CancellationToken,
) -> AppResult<()> {
    info!(addr = ?listener.local_addr().ok(), "Monitor endpoint listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}
