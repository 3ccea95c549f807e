use crate::types::InboundContent;
use anyhow::{Result, anyhow};
use bg_core::SenderId;
use bg_transcribe::MediaRef;
use serde::Deserialize;

const GROUP_JID_SUFFIX: &str = "@g.us";

#[derive(Debug, Default, Deserialize)]
struct EvolutionPayload {
    #[serde(default)]
    event: Option<String>,
    #[serde(default)]
    data: Option<EvolutionData>,
}

#[derive(Debug, Default, Deserialize)]
struct EvolutionData {
    #[serde(default)]
    key: Option<EvolutionKey>,
    #[serde(default)]
    message: Option<EvolutionMessage>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvolutionKey {
    #[serde(default)]
    remote_jid: String,
    #[serde(default)]
    from_me: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EvolutionMessage {
    #[serde(default)]
    conversation: Option<String>,
    #[serde(default)]
    extended_text_message: Option<ExtendedText>,
    #[serde(default)]
    audio_message: Option<serde_json::Value>,
    #[serde(default)]
    image_message: Option<ImageMessage>,
    /// Media bytes, present when the instance has "webhook base64" enabled.
    #[serde(default)]
    base64: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtendedText {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct ImageMessage {
    #[serde(default)]
    caption: Option<String>,
}

/// `messages.upsert` and `MESSAGES_UPSERT` are both seen in the wild.
fn is_message_event(event: &str) -> bool {
    event.replace('_', ".").eq_ignore_ascii_case("messages.upsert")
}

pub(crate) fn extract(raw: &serde_json::Value) -> Result<Option<(SenderId, InboundContent)>> {
    let payload = EvolutionPayload::deserialize(raw)
        .map_err(|e| anyhow!("invalid evolution webhook payload: {e}"))?;

    if payload
        .event
        .as_deref()
        .is_some_and(|event| !is_message_event(event))
    {
        return Ok(None);
    }

    let data = payload
        .data
        .ok_or_else(|| anyhow!("evolution payload is missing `data`"))?;
    let key = data
        .key
        .ok_or_else(|| anyhow!("evolution payload is missing `data.key`"))?;
    if key.from_me {
        return Ok(None);
    }
    let jid = key.remote_jid.trim();
    if jid.ends_with(GROUP_JID_SUFFIX) {
        return Ok(None);
    }
    let sender = jid.split('@').next().unwrap_or_default().trim();
    if sender.is_empty() {
        return Err(anyhow!("evolution payload is missing `data.key.remoteJid`"));
    }

    let Some(message) = data.message else {
        return Ok(None);
    };
    let media = message
        .base64
        .as_deref()
        .map(str::trim)
        .filter(|b64| !b64.is_empty())
        .map(|b64| MediaRef::Base64(b64.to_string()));

    let text = message
        .conversation
        .as_deref()
        .or(message.extended_text_message.as_ref().map(|t| t.text.as_str()))
        .map(str::trim)
        .filter(|text| !text.is_empty());

    let content = if let Some(text) = text {
        Some(InboundContent::Text(text.to_string()))
    } else if message.audio_message.is_some() {
        media.map(InboundContent::Audio)
    } else if let Some(image) = message.image_message.as_ref() {
        media.map(|media| InboundContent::Image {
            media,
            caption: image.caption.clone().filter(|c| !c.trim().is_empty()),
        })
    } else {
        None
    };

    Ok(content.map(|content| (SenderId::new(sender), content)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn upsert(key: serde_json::Value, message: serde_json::Value) -> serde_json::Value {
        json!({
            "event": "messages.upsert",
            "instance": "clinic",
            "data": { "key": key, "message": message }
        })
    }

    #[test]
    fn extracts_conversation_and_extended_text() {
        let (sender, content) = extract(&upsert(
            json!({ "remoteJid": "5511988887777@s.whatsapp.net", "fromMe": false }),
            json!({ "conversation": "bom dia" }),
        ))
        .expect("extract")
        .expect("message");
        assert_eq!(sender.as_str(), "5511988887777");
        assert_eq!(content, InboundContent::Text("bom dia".to_string()));

        let (_, content) = extract(&upsert(
            json!({ "remoteJid": "5511988887777@s.whatsapp.net" }),
            json!({ "extendedTextMessage": { "text": "link: https://x.example" } }),
        ))
        .expect("extract")
        .expect("message");
        assert_eq!(
            content,
            InboundContent::Text("link: https://x.example".to_string())
        );
    }

    #[test]
    fn extracts_inline_media() {
        let (_, audio) = extract(&upsert(
            json!({ "remoteJid": "5511@s.whatsapp.net" }),
            json!({ "audioMessage": { "seconds": 4 }, "base64": "T2dnUw==" }),
        ))
        .expect("extract")
        .expect("audio");
        assert_eq!(
            audio,
            InboundContent::Audio(MediaRef::Base64("T2dnUw==".to_string()))
        );

        let (_, image) = extract(&upsert(
            json!({ "remoteJid": "5511@s.whatsapp.net" }),
            json!({ "imageMessage": { "caption": "" }, "base64": "/9j/4AAQ" }),
        ))
        .expect("extract")
        .expect("image");
        assert_eq!(
            image,
            InboundContent::Image {
                media: MediaRef::Base64("/9j/4AAQ".to_string()),
                caption: None,
            }
        );

        let without_bytes = upsert(
            json!({ "remoteJid": "5511@s.whatsapp.net" }),
            json!({ "audioMessage": { "seconds": 4 } }),
        );
        assert!(extract(&without_bytes).expect("well-formed").is_none());
    }

    #[test]
    fn ignores_groups_echoes_and_other_events() {
        let group = upsert(
            json!({ "remoteJid": "120363000000@g.us" }),
            json!({ "conversation": "hi all" }),
        );
        let echo = upsert(
            json!({ "remoteJid": "5511@s.whatsapp.net", "fromMe": true }),
            json!({ "conversation": "sent by us" }),
        );
        let update = json!({ "event": "messages.update", "data": { "status": "READ" } });
        for payload in [group, echo, update] {
            assert!(extract(&payload).expect("well-formed").is_none());
        }

        let screaming = json!({
            "event": "MESSAGES_UPSERT",
            "data": {
                "key": { "remoteJid": "5511@s.whatsapp.net" },
                "message": { "conversation": "oi" }
            }
        });
        assert!(extract(&screaming).expect("extract").is_some());
    }

    #[test]
    fn missing_sender_is_an_error() {
        assert!(extract(&json!({ "event": "messages.upsert" })).is_err());
        let no_jid = upsert(json!({ "fromMe": false }), json!({ "conversation": "hi" }));
        assert!(extract(&no_jid).is_err());
    }
}
