use crate::routes::{burst_error_response, error_response};
use crate::server::AppState;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json};
use bg_core::TriggerPayload;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/triggers", post(fire_trigger))
}

/// Callback for external delay services: runs the consistency gate once.
#[tracing::instrument(level = "info", skip_all)]
async fn fire_trigger(Extension(state): Extension<Arc<AppState>>, body: Bytes) -> Response {
    let payload: TriggerPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid trigger payload: {error}"),
            );
        }
    };

    match state.gate.check(&payload).await {
        Ok(outcome) => {
            let mut response = serde_json::Map::new();
            response.insert("status".to_string(), serde_json::json!("ok"));
            if let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(outcome) {
                response.extend(fields);
            }
            (StatusCode::OK, Json(serde_json::Value::Object(response))).into_response()
        }
        Err(error) => burst_error_response(error),
    }
}
