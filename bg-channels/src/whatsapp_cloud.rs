use crate::types::InboundContent;
use anyhow::{Result, anyhow};
use bg_core::SenderId;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct CloudWebhookPayload {
    #[serde(default)]
    entry: Vec<CloudEntry>,
}

#[derive(Debug, Deserialize)]
struct CloudEntry {
    #[serde(default)]
    changes: Vec<CloudChange>,
}

#[derive(Debug, Deserialize)]
struct CloudChange {
    #[serde(default)]
    value: CloudChangeValue,
}

#[derive(Debug, Default, Deserialize)]
struct CloudChangeValue {
    #[serde(default)]
    messages: Vec<CloudMessage>,
}

#[derive(Debug, Deserialize)]
struct CloudMessage {
    #[serde(default)]
    from: String,
    #[serde(rename = "type", default)]
    message_type: String,
    #[serde(default)]
    text: Option<CloudText>,
}

#[derive(Debug, Deserialize)]
struct CloudText {
    #[serde(default)]
    body: String,
}

/// First text message wins. Media needs a separate Graph API download and is
/// skipped; status-only deliveries have no `messages` and yield nothing.
pub(crate) fn extract(raw: &serde_json::Value) -> Result<Option<(SenderId, InboundContent)>> {
    let payload = CloudWebhookPayload::deserialize(raw)
        .map_err(|e| anyhow!("invalid whatsapp webhook payload: {e}"))?;

    for message in payload
        .entry
        .iter()
        .flat_map(|entry| entry.changes.iter())
        .flat_map(|change| change.value.messages.iter())
    {
        if message.message_type != "text" {
            continue;
        }
        let Some(body) = message
            .text
            .as_ref()
            .map(|text| text.body.trim())
            .filter(|body| !body.is_empty())
        else {
            continue;
        };
        let sender = message.from.trim();
        if sender.is_empty() {
            return Err(anyhow!("whatsapp message is missing `from`"));
        }
        return Ok(Some((
            SenderId::new(sender),
            InboundContent::Text(body.to_string()),
        )));
    }
    Ok(None)
}
