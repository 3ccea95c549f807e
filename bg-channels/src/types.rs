use bg_core::{SenderId, TenantId};
use bg_transcribe::MediaRef;
use serde::{Deserialize, Serialize};

/// What a single inbound chat message carries before text resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InboundContent {
    Text(String),
    Audio(MediaRef),
    Image {
        media: MediaRef,
        caption: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundEnvelope {
    pub tenant_id: TenantId,
    pub sender_id: SenderId,
    pub content: InboundContent,
    /// Provider the envelope came from, for logs.
    pub channel_hint: &'static str,
}
