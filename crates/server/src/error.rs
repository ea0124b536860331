//! Maps `EngineError` onto HTTP status codes, following the teacher's
//! `(StatusCode, Json<QueryErrorResponse>)` response-tuple pattern.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use agentrun_core::EngineError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError(pub StatusCode, pub String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status = match &e {
            EngineError::Input(_) => StatusCode::BAD_REQUEST,
            EngineError::Provider(_) => StatusCode::BAD_GATEWAY,
            EngineError::Parse(_) => StatusCode::BAD_REQUEST,
            EngineError::Tool(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Control(_) => StatusCode::INTERNAL_SERVER_ERROR,
            EngineError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, e.to_string())
    }
}

pub fn not_found(resource: &str) -> ApiError {
    ApiError(StatusCode::NOT_FOUND, format!("{resource} not found"))
}

pub fn forbidden(message: impl Into<String>) -> ApiError {
    ApiError(StatusCode::FORBIDDEN, message.into())
}

pub fn payment_required(message: impl Into<String>) -> ApiError {
    ApiError(StatusCode::PAYMENT_REQUIRED, message.into())
}
