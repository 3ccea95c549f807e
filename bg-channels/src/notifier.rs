use anyhow::{Result, anyhow};
use async_trait::async_trait;
use bg_core::{BurstError, Notifier, SenderId, TenantId};
use reqwest::Url;
use serde::Serialize;
use std::collections::HashMap;

const CLIENT_TOKEN_HEADER: &str = "Client-Token";

/// Posts a closed burst to the tenant's send-message endpoint.
#[derive(Clone)]
pub struct HttpNotifier {
    http: reqwest::Client,
    client_token: Option<String>,
    tenant_urls: HashMap<TenantId, Url>,
    default_url: Option<Url>,
}

#[derive(Debug, Serialize)]
struct SendMessageBody<'a> {
    app_id: &'a str,
    phone: &'a str,
    message: &'a str,
}

impl HttpNotifier {
    pub fn new(client_token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            client_token: client_token
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
            tenant_urls: HashMap::new(),
            default_url: None,
        })
    }

    pub fn with_tenant_url(mut self, tenant_id: impl Into<TenantId>, url: &str) -> Result<Self> {
        let tenant_id = tenant_id.into();
        let url = parse_url(url).map_err(|e| anyhow!("tenant {tenant_id}: {e}"))?;
        self.tenant_urls.insert(tenant_id, url);
        Ok(self)
    }

    pub fn with_tenant_urls<'a>(
        self,
        urls: impl IntoIterator<Item = (&'a String, &'a String)>,
    ) -> Result<Self> {
        urls.into_iter()
            .try_fold(self, |notifier, (tenant, url)| {
                notifier.with_tenant_url(tenant.as_str(), url)
            })
    }

    pub fn with_default_url(mut self, url: Option<&str>) -> Result<Self> {
        self.default_url = match url.map(str::trim).filter(|u| !u.is_empty()) {
            Some(url) => Some(parse_url(url)?),
            None => None,
        };
        Ok(self)
    }

    pub fn target_url(&self, tenant_id: &TenantId) -> Option<&Url> {
        self.tenant_urls.get(tenant_id).or(self.default_url.as_ref())
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| anyhow!("invalid notifier url {raw:?}: {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!("unsupported notifier url scheme: {other}")),
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    #[tracing::instrument(level = "info", skip_all, fields(tenant_id = %tenant_id, sender_id = %sender_id))]
    async fn send(
        &self,
        tenant_id: &TenantId,
        sender_id: &SenderId,
        text: &str,
    ) -> bg_core::Result<()> {
        let Some(url) = self.target_url(tenant_id) else {
            return Err(BurstError::NotifierFailure(format!(
                "no notifier url configured for tenant {tenant_id}"
            )));
        };

        let body = SendMessageBody {
            app_id: tenant_id.as_str(),
            phone: sender_id.as_str(),
            message: text,
        };
        let mut request = self.http.post(url.clone()).json(&body);
        if let Some(token) = self.client_token.as_deref() {
            request = request.header(CLIENT_TOKEN_HEADER, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| BurstError::NotifierFailure(format!("send-message request: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BurstError::NotifierFailure(format!(
                "send-message status={status} body={body}"
            )));
        }
        tracing::info!(%status, "burst delivered");
        Ok(())
    }
}

/// Emits the merged burst as a log event and nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        tenant_id: &TenantId,
        sender_id: &SenderId,
        text: &str,
    ) -> bg_core::Result<()> {
        tracing::info!(
            tenant_id = %tenant_id,
            sender_id = %sender_id,
            chars = text.chars().count(),
            text,
            "burst ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_url_takes_precedence_over_default() {
        let notifier = HttpNotifier::new(Some("secret".to_string()))
            .expect("client")
            .with_tenant_url("app-1", "https://a.example/send-text")
            .expect("tenant url")
            .with_default_url(Some("https://fallback.example/send"))
            .expect("default url");

        assert_eq!(
            notifier
                .target_url(&TenantId::new("app-1"))
                .map(Url::as_str),
            Some("https://a.example/send-text")
        );
        assert_eq!(
            notifier
                .target_url(&TenantId::new("app-2"))
                .map(Url::as_str),
            Some("https://fallback.example/send")
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        let notifier = HttpNotifier::new(None).expect("client");
        assert!(notifier.clone().with_tenant_url("app-1", "ftp://x").is_err());
        assert!(notifier.with_default_url(Some("not a url")).is_err());
    }

    #[test]
    fn send_body_uses_send_message_field_names() {
        let body = SendMessageBody {
            app_id: "app-1",
            phone: "5511",
            message: "hello world",
        };
        assert_eq!(
            serde_json::to_value(&body).expect("json"),
            serde_json::json!({ "app_id": "app-1", "phone": "5511", "message": "hello world" })
        );
    }

    #[tokio::test]
    async fn unknown_tenant_without_default_is_a_notifier_failure() {
        let notifier = HttpNotifier::new(None)
            .expect("client")
            .with_tenant_url("app-1", "http://127.0.0.1:9/send")
            .expect("tenant url");
        let err = notifier
            .send(&TenantId::new("app-2"), &SenderId::new("5511"), "hi")
            .await
            .expect_err("no url");
        assert!(matches!(err, BurstError::NotifierFailure(_)));
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        LogNotifier
            .send(&TenantId::new("app-1"), &SenderId::new("5511"), "hello")
            .await
            .expect("log");
    }
}
