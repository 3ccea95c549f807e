use crate::routes::{burst_error_response, error_response};
use crate::server::AppState;
use axum::body::Bytes;
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Extension, Json};
use bg_channels::{MessageSource, normalize};
use bg_core::TenantId;
use serde::Deserialize;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/webhooks/{provider}", post(ingest_webhook))
}

#[derive(Debug, Deserialize)]
struct WebhookQuery {
    #[serde(default, alias = "appId")]
    app_id: Option<String>,
}

#[tracing::instrument(level = "info", skip_all, fields(provider = %provider))]
async fn ingest_webhook(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(query): Query<WebhookQuery>,
    body: Bytes,
) -> Response {
    let source: MessageSource = match provider.parse() {
        Ok(source) => source,
        Err(error) => return error_response(StatusCode::BAD_REQUEST, error.to_string()),
    };
    let Some(tenant_id) = query
        .app_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(TenantId::new)
    else {
        return error_response(StatusCode::BAD_REQUEST, "missing app_id query parameter");
    };
    let raw: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(raw) => raw,
        Err(error) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid {source} webhook payload: {error}"),
            );
        }
    };

    let request = match normalize(source, &tenant_id, &raw, state.transcriber.as_ref()).await {
        Ok(Some(request)) => request,
        Ok(None) => {
            return (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "ok", "accepted": false })),
            )
                .into_response();
        }
        Err(error) => {
            tracing::warn!(%tenant_id, error = %error, "rejected webhook payload");
            return error_response(StatusCode::BAD_REQUEST, error.to_string());
        }
    };

    match state.coordinator.ingest(request).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ok",
                "accepted": true,
                "created": receipt.created,
                "last_update": receipt.pending.last_update,
                "trigger_id": receipt.trigger_id,
            })),
        )
            .into_response(),
        Err(error) => burst_error_response(error),
    }
}
