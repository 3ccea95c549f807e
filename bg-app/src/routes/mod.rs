pub mod health;
pub mod pending;
pub mod triggers;
pub mod webhooks;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use bg_core::BurstError;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .merge(webhooks::router())
        .merge(triggers::router())
        .merge(pending::router())
}

/// 5xx for anything the caller should retry; the provider or workflow
/// service redelivers on those.
pub(crate) fn status_for(error: &BurstError) -> StatusCode {
    match error {
        BurstError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        BurstError::NotFound { .. } => StatusCode::NOT_FOUND,
        BurstError::AlreadyExists { .. } => StatusCode::CONFLICT,
        BurstError::Contention { .. }
        | BurstError::StoreUnavailable(_)
        | BurstError::SchedulerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BurstError::NotifierFailure(_) => StatusCode::BAD_GATEWAY,
    }
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "status": "error",
            "error": message.into(),
        })),
    )
        .into_response()
}

pub(crate) fn burst_error_response(error: BurstError) -> Response {
    let status = status_for(&error);
    if status.is_server_error() {
        tracing::warn!(%error, status = status.as_u16(), "request failed");
    }
    error_response(status, error.to_string())
}
