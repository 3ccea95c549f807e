use crate::types::InboundContent;
use anyhow::{Result, anyhow};
use bg_core::SenderId;
use bg_transcribe::MediaRef;
use serde::Deserialize;

const RECEIVED_CALLBACK: &str = "ReceivedCallback";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZApiPayload {
    #[serde(rename = "type", default)]
    callback_type: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    from_me: bool,
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    text: Option<ZApiText>,
    #[serde(default)]
    audio: Option<ZApiAudio>,
    #[serde(default)]
    image: Option<ZApiImage>,
}

#[derive(Debug, Default, Deserialize)]
struct ZApiText {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZApiAudio {
    #[serde(default)]
    audio_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ZApiImage {
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    caption: Option<String>,
}

pub(crate) fn extract(raw: &serde_json::Value) -> Result<Option<(SenderId, InboundContent)>> {
    let payload = ZApiPayload::deserialize(raw)
        .map_err(|e| anyhow!("invalid z-api webhook payload: {e}"))?;

    if payload
        .callback_type
        .as_deref()
        .is_some_and(|kind| kind != RECEIVED_CALLBACK)
    {
        return Ok(None);
    }
    if payload.from_me || payload.is_group {
        return Ok(None);
    }

    let sender = payload
        .phone
        .as_deref()
        .map(str::trim)
        .filter(|phone| !phone.is_empty())
        .ok_or_else(|| anyhow!("z-api payload is missing `phone`"))?;

    let content = if let Some(text) = payload.text.as_ref() {
        let message = text.message.trim();
        (!message.is_empty()).then(|| InboundContent::Text(message.to_string()))
    } else if let Some(audio) = payload.audio.as_ref() {
        let url = audio.audio_url.trim();
        (!url.is_empty()).then(|| InboundContent::Audio(MediaRef::Url(url.to_string())))
    } else if let Some(image) = payload.image.as_ref() {
        let url = image.image_url.trim();
        (!url.is_empty()).then(|| InboundContent::Image {
            media: MediaRef::Url(url.to_string()),
            caption: image.caption.clone().filter(|c| !c.trim().is_empty()),
        })
    } else {
        None
    };

    Ok(content.map(|content| (SenderId::new(sender), content)))
}
