//! Thread creation, the entry point before any agent run can start.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use agentrun_core::ThreadId;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Serialize)]
pub struct ThreadCreated {
    pub thread_id: ThreadId,
}

pub async fn thread_create(State(state): State<Arc<AppState>>) -> Result<Json<ThreadCreated>, ApiError> {
    let thread_id = ThreadId::new();
    state.thread_store.create_thread(thread_id).await?;
    Ok(Json(ThreadCreated { thread_id }))
}
