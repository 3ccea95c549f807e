use crate::types::InboundEnvelope;
use crate::{evolution, whatsapp_cloud, zapi};
use anyhow::{Result, anyhow};
use bg_core::TenantId;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Webhook dialects accepted on the inbound route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageSource {
    ZApi,
    Evolution,
    WhatsAppCloud,
}

impl MessageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ZApi => "z-api",
            Self::Evolution => "evolution",
            Self::WhatsAppCloud => "whatsapp-cloud",
        }
    }

    /// Reduces a raw provider payload to an envelope.
    ///
    /// `Ok(None)` means the payload is well-formed but carries nothing to
    /// debounce (outbound echo, group chat, status callback, unsupported
    /// media). `Err` means the payload is unusable, e.g. it has no sender.
    pub fn extract(
        &self,
        tenant_id: &TenantId,
        raw: &serde_json::Value,
    ) -> Result<Option<InboundEnvelope>> {
        let extracted = match self {
            Self::ZApi => zapi::extract(raw)?,
            Self::Evolution => evolution::extract(raw)?,
            Self::WhatsAppCloud => whatsapp_cloud::extract(raw)?,
        };
        Ok(extracted.map(|(sender_id, content)| InboundEnvelope {
            tenant_id: tenant_id.clone(),
            sender_id,
            content,
            channel_hint: self.as_str(),
        }))
    }
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageSource {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "z-api" | "zapi" => Ok(Self::ZApi),
            "evolution" => Ok(Self::Evolution),
            "whatsapp-cloud" | "whatsapp_cloud" => Ok(Self::WhatsAppCloud),
            other => Err(anyhow!("unknown message source: {other}")),
        }
    }
}
