//! The five agent-run endpoints (§6): start, stop, get, list-for-thread,
//! and the SSE event stream, grounded on the teacher's
//! `sessions_execute.rs`/`sessions_stream.rs` handler shapes — request
//! extraction, gateway checks, `ApiError` mapping, `Sse` response.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use agentrun_agent::AgentRun;
use agentrun_core::{RunId, ThreadId};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct AgentStartRequest {
    /// Additional content appended as a user-role message before the run
    /// starts. Omit to re-run the thread's existing history as-is.
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: Value,
}

fn default_system_prompt() -> Value {
    json!({ "role": "system", "content": "You are a helpful assistant." })
}

#[derive(Serialize)]
pub struct AgentStartResponse {
    pub agent_run_id: RunId,
    pub status: &'static str,
}

pub async fn agent_start(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
    body: Option<Json<AgentStartRequest>>,
) -> Result<Json<AgentStartResponse>, ApiError> {
    let Json(request) = body.unwrap_or_default();

    state
        .auth
        .verify_thread_access(thread_id, None)
        .await
        .map_err(|_| crate::error::forbidden("thread access denied"))?;
    state
        .billing
        .check_billing_status(None)
        .await
        .map_err(|_| crate::error::payment_required("billing check failed"))?;

    if let Some(message) = request.message {
        state.supervisor.add_user_message(thread_id, message).await?;
    }

    let run_id = state.supervisor.start(thread_id, request.system_prompt, None).await?;
    Ok(Json(AgentStartResponse { agent_run_id: run_id, status: "running" }))
}

#[derive(Serialize)]
pub struct AgentStopResponse {
    pub status: &'static str,
}

pub async fn agent_run_stop(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
) -> Result<Json<AgentStopResponse>, ApiError> {
    state.supervisor.stop(run_id).await?;
    Ok(Json(AgentStopResponse { status: "stopped" }))
}

pub async fn agent_run_get(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
) -> Result<Json<AgentRun>, ApiError> {
    let run = state
        .supervisor
        .get_run(run_id)
        .await?
        .ok_or_else(|| crate::error::not_found("agent run"))?;
    Ok(Json(run))
}

pub async fn thread_agent_runs(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<ThreadId>,
) -> Result<Json<Vec<AgentRun>>, ApiError> {
    let runs = state.supervisor.list_for_thread(thread_id).await?;
    Ok(Json(runs))
}

pub async fn agent_run_stream(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<RunId>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if state.supervisor.get_run(run_id).await?.is_none() {
        return Err(crate::error::not_found("agent run"));
    }
    let events = state.supervisor.stream(run_id).await?;
    let sse_stream = events.map(|event| {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().data(payload))
    });

    Ok(Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
