//! HTTP trigger server.
//!
//! `POST /rollout` runs one sweep over every configured strategy and
//! reports the aggregate outcome; `GET /healthz` is a liveness probe.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::sync::watch;
use tracing::{info, warn};

use ramp_core::Config;

use crate::sweep::{self, Endpoints};

/// Shared state for the trigger handlers.
#[derive(Clone)]
pub struct AppState {
    pub endpoints: Endpoints,
    pub config: Arc<Config>,
    pub shutdown: watch::Receiver<bool>,
}

/// Outcome of a triggered sweep.
#[derive(serde::Serialize)]
struct SweepResponse {
    success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    errors: Vec<String>,
}

/// Build the trigger router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/rollout", post(trigger_rollout))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Serve the router until interrupted, then signal shutdown.
pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP trigger server starting");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

/// POST /rollout
async fn trigger_rollout(State(state): State<AppState>) -> impl IntoResponse {
    let mut errors = Vec::new();
    for strategy in &state.config.strategies {
        errors.extend(sweep::run_sweep(&state.endpoints, strategy, &state.shutdown).await);
    }

    if errors.is_empty() {
        return (
            StatusCode::OK,
            Json(SweepResponse {
                success: true,
                errors: Vec::new(),
            }),
        );
    }

    warn!(
        n = errors.len(),
        "sweep finished with errors:\n{}",
        sweep::errors_to_string(&errors)
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(SweepResponse {
            success: false,
            errors: errors.iter().map(|e| e.to_string()).collect(),
        }),
    )
}
