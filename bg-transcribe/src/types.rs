use serde::{Deserialize, Serialize};

/// Where the media bytes live: inline in the webhook, or behind a provider URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MediaRef {
    Base64(String),
    Url(String),
}

impl MediaRef {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Base64(data) => data.trim().is_empty(),
            Self::Url(url) => url.trim().is_empty(),
        }
    }
}

/// Strips an optional `data:<mime>;base64,` prefix.
pub(crate) fn base64_body(data: &str) -> &str {
    let data = data.trim();
    match data.split_once(";base64,") {
        Some((prefix, body)) if prefix.starts_with("data:") => body,
        _ => data,
    }
}
