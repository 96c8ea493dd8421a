//! Admin HTTP surface: `/healthz`, `/readyz`, `/metrics`, on its own bind
//! address, started well before the TCP listener (bootstrap step 6 vs step
//! 8) so `/readyz` can report dependency health while the gateway is still
//! coming up.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use gw_core::Metrics;
use gw_repo::Repository;
use gw_session::SessionStore;

#[derive(Clone)]
pub struct AdminState {
    pub metrics: Arc<Metrics>,
    pub repo: Repository,
    pub session_store: Arc<dyn SessionStore>,
    pub listener_ready: Arc<AtomicBool>,
}

pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn healthz(State(state): State<AdminState>) -> impl IntoResponse {
    if state.listener_ready.load(Ordering::Relaxed) {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "listener not running")
    }
}

/// Ready means both dependencies answer: one round-trip against the
/// database pool, one lookup (for an id no real device will ever have)
/// against the session store.
async fn readyz(State(state): State<AdminState>) -> impl IntoResponse {
    if let Err(err) = sqlx::query("SELECT 1").execute(state.repo.pool()).await {
        return (StatusCode::SERVICE_UNAVAILABLE, format!("database unreachable: {err}"));
    }
    if let Err(err) = state.session_store.lookup("__readyz_probe__").await {
        return (StatusCode::SERVICE_UNAVAILABLE, format!("session store unreachable: {err}"));
    }
    (StatusCode::OK, "ok".to_owned())
}

async fn metrics(State(state): State<AdminState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.render_prometheus())
}
