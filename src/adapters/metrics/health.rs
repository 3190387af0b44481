//! Health Check Server - Liveness, Readiness and Status
//!
//! - `/live`: 200 while the process runs
//! - `/ready`: 200 only while the feed is in the `live` stage
//! - `/status`: latest feed status snapshot as JSON

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use tokio::sync::{broadcast, watch};
use tracing::{info, instrument};

use crate::domain::feed_state::{FeedStatus, Stage};

/// Shared state read by the probes.
#[derive(Debug, Clone)]
pub struct HealthState {
    status: watch::Receiver<FeedStatus>,
}

impl HealthState {
    pub const fn new(status: watch::Receiver<FeedStatus>) -> Self {
        Self { status }
    }

    /// Ready once the feed has caught up and streams live.
    pub fn is_ready(&self) -> bool {
        self.status.borrow().stage == Stage::Live
    }

    pub fn snapshot(&self) -> FeedStatus {
        self.status.borrow().clone()
    }
}

/// Axum-based health HTTP server.
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub const fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .route("/status", get(Self::status))
            .with_state(Arc::clone(&self.state))
    }

    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
        if state.is_ready() {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }

    async fn status(State(state): State<Arc<HealthState>>) -> Json<FeedStatus> {
        Json(state.snapshot())
    }
}
