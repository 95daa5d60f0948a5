//! REST API response types.
//!
//! Field names are snake_case and match the engine's JSON shapes; the
//! dataset page and statistics snapshot are serialized as-is.

use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{EngineError, ServerError};
use crate::watcher::RefreshOutcome;

/// `GET /diet-types`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DietTypesResponse {
    pub diet_types: Vec<String>,
}

/// `GET /cuisine-types`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuisineTypesResponse {
    pub cuisine_types: Vec<String>,
}

/// `POST /clear-cache`
#[derive(Debug, Clone, Serialize)]
pub struct ClearCacheResponse {
    pub message: String,
    pub refresh: RefreshOutcome,
}

impl From<RefreshOutcome> for ClearCacheResponse {
    fn from(refresh: RefreshOutcome) -> Self {
        Self {
            message: "Cache cleared".to_string(),
            refresh,
        }
    }
}

/// Error tuple returned by every fallible handler.
pub type ApiError = (StatusCode, Json<Value>);

/// Create an error response body
pub fn error_response(error: &str) -> Value {
    json!({ "error": error })
}

/// HTTP status for a server error.
pub fn status_for(err: &ServerError) -> StatusCode {
    match err {
        ServerError::Engine(EngineError::SourceUnavailable(_)) => StatusCode::NOT_FOUND,
        ServerError::Engine(EngineError::ComputeFault(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        ServerError::Engine(EngineError::CacheBackendUnavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
        ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert any engine or server error into the handler error tuple.
pub fn api_error(err: impl Into<ServerError>) -> ApiError {
    let err = err.into();
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(%err, "request failed");
    } else {
        tracing::debug!(%err, "request rejected");
    }

    let message = match &err {
        ServerError::Engine(inner) => inner.to_string(),
        other => other.to_string(),
    };
    (status, Json(error_response(&message)))
}
