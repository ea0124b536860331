//! Liveness endpoint: reports process readiness and the redacted config
//! summary, trimmed from the teacher's `HealthResponse`'s loading-phase
//! reporting down to what this engine actually tracks (no catalog/graph
//! loading state to report on).

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub llm_configured: bool,
    pub config: serde_json::Value,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        llm_configured: state.config.llm.is_configured(),
        config: state.config.redacted_summary(),
    })
}
