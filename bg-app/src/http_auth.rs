use axum::Json;
use axum::body::Body;
use axum::extract::Query;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

pub const WEBHOOK_TOKEN_HEADER: &str = "x-webhook-token";

/// Shared secret for mutating routes. `None` disables the check.
#[derive(Debug, Clone, Default)]
pub struct WebhookTokenPolicy {
    pub token: Option<String>,
}

impl WebhookTokenPolicy {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(ToOwned::to_owned),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn provided_token(headers: &HeaderMap, uri: &axum::http::Uri) -> Option<String> {
    if let Some(value) = headers
        .get(WEBHOOK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(value.to_string());
    }
    Query::<TokenQuery>::try_from_uri(uri)
        .ok()
        .and_then(|Query(query)| query.token)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

pub(crate) fn constant_time_eq(left: &str, right: &str) -> bool {
    let left_bytes = left.as_bytes();
    let right_bytes = right.as_bytes();
    let mut diff = left_bytes.len() ^ right_bytes.len();
    for index in 0..left_bytes.len().max(right_bytes.len()) {
        let l = left_bytes.get(index).copied().unwrap_or(0);
        let r = right_bytes.get(index).copied().unwrap_or(0);
        diff |= (l ^ r) as usize;
    }
    diff == 0
}

fn unauthorized(code: &str, message: &str) -> Response {
    tracing::warn!(error_code = code, error = message, "webhook token rejected");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "status": "error",
            "error": message,
            "error_code": code,
        })),
    )
        .into_response()
}

#[tracing::instrument(level = "debug", skip_all)]
pub async fn require_webhook_token(req: Request<Body>, next: Next) -> Response {
    if !is_mutating(req.method()) {
        return next.run(req).await;
    }
    let expected = req
        .extensions()
        .get::<WebhookTokenPolicy>()
        .and_then(|policy| policy.token.clone());
    let Some(expected) = expected else {
        return next.run(req).await;
    };

    let Some(provided) = provided_token(req.headers(), req.uri()) else {
        return unauthorized("missing_webhook_token", "missing webhook token");
    };
    if !constant_time_eq(&expected, &provided) {
        return unauthorized("invalid_webhook_token", "invalid webhook token");
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, Uri};

    #[test]
    fn constant_time_eq_compares_whole_strings() {
        assert!(constant_time_eq("secret", "secret"));
        assert!(!constant_time_eq("secret", "secreT"));
        assert!(!constant_time_eq("secret", "secret-and-more"));
        assert!(!constant_time_eq("", "x"));
    }

    #[test]
    fn token_comes_from_header_before_query() {
        let uri: Uri = "/api/v1/webhooks/z-api?app_id=a&token=from-query"
            .parse()
            .expect("uri");
        let mut headers = HeaderMap::new();
        assert_eq!(
            provided_token(&headers, &uri).as_deref(),
            Some("from-query")
        );

        headers.insert(WEBHOOK_TOKEN_HEADER, HeaderValue::from_static("from-header"));
        assert_eq!(
            provided_token(&headers, &uri).as_deref(),
            Some("from-header")
        );

        let bare: Uri = "/api/v1/triggers".parse().expect("uri");
        assert!(provided_token(&HeaderMap::new(), &bare).is_none());
    }

    #[test]
    fn blank_policy_token_disables_check() {
        assert!(WebhookTokenPolicy::new(Some("  ")).token.is_none());
        assert_eq!(
            WebhookTokenPolicy::new(Some(" s3cret ")).token.as_deref(),
            Some("s3cret")
        );
    }
}
