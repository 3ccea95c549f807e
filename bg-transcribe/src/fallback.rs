use crate::error::{Result, TranscribeError};
use crate::traits::ContentTranscriber;
use crate::types::MediaRef;
use async_trait::async_trait;

/// Instruction handed downstream when media cannot be understood, so the
/// responder asks the user to type instead.
pub const DEFAULT_FALLBACK_TEXT: &str = "Write this without any extra explanation and without quotes: \"I can't understand this media right now, could you please type what you need?\"";

/// Never fails: extraction errors degrade to a fixed fallback text.
pub struct FallbackTranscriber<T> {
    inner: T,
    fallback_text: String,
}

impl<T: ContentTranscriber> FallbackTranscriber<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
        }
    }

    pub fn with_fallback_text(mut self, fallback_text: impl Into<String>) -> Self {
        let fallback_text = fallback_text.into();
        if !fallback_text.trim().is_empty() {
            self.fallback_text = fallback_text;
        }
        self
    }

    fn degrade(&self, kind: &str, error: TranscribeError) -> String {
        tracing::warn!(media_kind = kind, %error, "media extraction failed; using fallback text");
        self.fallback_text.clone()
    }
}

#[async_trait]
impl<T: ContentTranscriber> ContentTranscriber for FallbackTranscriber<T> {
    async fn transcribe_audio(&self, media: &MediaRef) -> Result<String> {
        if media.is_empty() {
            return Ok(String::new());
        }
        Ok(match self.inner.transcribe_audio(media).await {
            Ok(text) => text,
            Err(e) => self.degrade("audio", e),
        })
    }

    async fn describe_image(&self, media: &MediaRef) -> Result<String> {
        if media.is_empty() {
            return Ok(String::new());
        }
        Ok(match self.inner.describe_image(media).await {
            Ok(text) => text,
            Err(e) => self.degrade("image", e),
        })
    }
}

/// Used when no transcription backend is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledTranscriber;

#[async_trait]
impl ContentTranscriber for DisabledTranscriber {
    async fn transcribe_audio(&self, _media: &MediaRef) -> Result<String> {
        Err(TranscribeError::InvalidInput(
            "audio transcription is disabled".to_string(),
        ))
    }

    async fn describe_image(&self, _media: &MediaRef) -> Result<String> {
        Err(TranscribeError::InvalidInput(
            "image description is disabled".to_string(),
        ))
    }
}
