use crate::source::MessageSource;
use crate::types::InboundContent;
use anyhow::Result;
use bg_core::{IngestRequest, TenantId};
use bg_transcribe::ContentTranscriber;

/// Turns inbound content into the text fragment that gets debounced.
///
/// Transcription errors are logged and resolve to empty text; wrap the
/// transcriber in `FallbackTranscriber` to substitute a message instead.
pub async fn resolve_text(content: &InboundContent, transcriber: &dyn ContentTranscriber) -> String {
    match content {
        InboundContent::Text(text) => text.trim().to_string(),
        InboundContent::Audio(media) => match transcriber.transcribe_audio(media).await {
            Ok(text) => text.trim().to_string(),
            Err(error) => {
                tracing::warn!(%error, "audio transcription failed");
                String::new()
            }
        },
        InboundContent::Image { media, caption } => {
            let description = match transcriber.describe_image(media).await {
                Ok(text) => text,
                Err(error) => {
                    tracing::warn!(%error, "image description failed");
                    String::new()
                }
            };
            let caption = caption.as_deref().unwrap_or_default();
            bg_core::merge_text(caption, &description)
        }
    }
}

/// Extracts and resolves a webhook payload into an ingest request.
///
/// `Ok(None)` covers both payloads with nothing to debounce and content that
/// resolved to empty text.
#[tracing::instrument(level = "debug", skip_all, fields(source = %source, tenant_id = %tenant_id))]
pub async fn normalize(
    source: MessageSource,
    tenant_id: &TenantId,
    raw: &serde_json::Value,
    transcriber: &dyn ContentTranscriber,
) -> Result<Option<IngestRequest>> {
    let Some(envelope) = source.extract(tenant_id, raw)? else {
        tracing::debug!("payload carries no debounceable content");
        return Ok(None);
    };
    let text = resolve_text(&envelope.content, transcriber).await;
    if text.is_empty() {
        tracing::debug!(sender_id = %envelope.sender_id, "content resolved to empty text");
        return Ok(None);
    }
    Ok(Some(IngestRequest {
        tenant_id: envelope.tenant_id,
        sender_id: envelope.sender_id,
        text,
    }))
}
