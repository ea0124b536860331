//! HTTP router construction.
//!
//! Assembles the Agent Run Engine's seven routes into a single `Router`.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api;
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/thread", post(api::thread_create))
        .route("/thread/{thread_id}/agent/start", post(api::agent_start))
        .route("/thread/{thread_id}/agent-runs", get(api::thread_agent_runs))
        .route("/agent-run/{run_id}/stop", post(api::agent_run_stop))
        .route("/agent-run/{run_id}", get(api::agent_run_get))
        .route("/agent-run/{run_id}/stream", get(api::agent_run_stream))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
