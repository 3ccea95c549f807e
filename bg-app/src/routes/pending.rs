use crate::routes::{burst_error_response, error_response};
use crate::server::AppState;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Extension, Json};
use bg_core::PendingKey;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/pending/{tenant_id}/{sender_id}", get(get_pending))
}

#[tracing::instrument(level = "debug", skip_all, fields(tenant_id = %tenant_id, sender_id = %sender_id))]
async fn get_pending(
    Extension(state): Extension<Arc<AppState>>,
    Path((tenant_id, sender_id)): Path<(String, String)>,
) -> Response {
    let key = PendingKey::new(tenant_id, sender_id);
    match state.store.get(&key).await {
        Ok(Some(message)) => (StatusCode::OK, Json(message)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no pending burst for {key}")),
        Err(error) => burst_error_response(error),
    }
}
