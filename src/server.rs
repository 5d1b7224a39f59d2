#![forbid(unsafe_code)]

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;

use crate::metrics;
use crate::store::{ChainStatus, SnapshotStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SnapshotStore>,
    pub started: Instant,
}

#[derive(Serialize)]
struct StatusResponse {
    service: ServiceInfo,
    uptime_secs: u64,
    chains: Vec<ChainStatus>,
}

#[derive(Serialize)]
struct ServiceInfo {
    name: &'static str,
    version: &'static str,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/readyz", get(ready))
        .route("/status", get(status))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    "ok"
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    if state.store.any_tick() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusResponse {
        service: ServiceInfo {
            name: "ibc-exporter",
            version: env!("CARGO_PKG_VERSION"),
        },
        uptime_secs: state.started.elapsed().as_secs(),
        chains: state.store.status_summary(),
    })
}

async fn metrics_handler() -> impl IntoResponse {
    (StatusCode::OK, metrics::gather_text())
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
