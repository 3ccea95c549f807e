use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/api/v1/health", get(get_health))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "checked_at": Utc::now(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "store": state.store_backend.as_str(),
        "scheduler": {
            "kind": state.scheduler.kind().as_str(),
            "active_jobs": state.scheduler.active_jobs(),
        },
        "debounce_seconds": state.coordinator.delay().as_secs(),
        "dispatch_mode": state.dispatch_mode,
    }))
}
