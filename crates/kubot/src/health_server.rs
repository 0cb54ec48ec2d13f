//! Liveness and readiness endpoints for the container orchestrator.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use kubot_kube::KubectlDispatcher;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub(crate) const HEALTH_ENDPOINT: &str = "/health";
pub(crate) const READY_ENDPOINT: &str = "/ready";

/// Dependency check backing `/ready`.
#[async_trait]
pub(crate) trait ReadinessProbe: Send + Sync {
    async fn check(&self) -> Result<()>;
}

#[async_trait]
impl ReadinessProbe for KubectlDispatcher {
    async fn check(&self) -> Result<()> {
        self.probe().await
    }
}

pub(crate) fn build_health_router(probe: Arc<dyn ReadinessProbe>) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(READY_ENDPOINT, get(handle_ready))
        .with_state(probe)
}

async fn handle_health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

async fn handle_ready(State(probe): State<Arc<dyn ReadinessProbe>>) -> (StatusCode, &'static str) {
    match probe.check().await {
        Ok(()) => (StatusCode::OK, "READY"),
        Err(probe_error) => {
            error!(error = %probe_error, "readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
        }
    }
}

/// Binds the health server and serves it until `shutdown_rx` flips to `true`.
pub(crate) async fn start_health_server(
    bind_addr: SocketAddr,
    probe: Arc<dyn ReadinessProbe>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind health server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound health server address")?;
    info!(addr = %local_addr, "health check server started");

    let app = build_health_router(probe);
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .context("health server exited unexpectedly")
    });
    Ok((local_addr, task))
}
