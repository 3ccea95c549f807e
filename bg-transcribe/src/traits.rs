use crate::error::Result;
use crate::types::MediaRef;
use async_trait::async_trait;

#[async_trait]
pub trait ContentTranscriber: Send + Sync {
    /// Speech-to-text for a voice note.
    async fn transcribe_audio(&self, media: &MediaRef) -> Result<String>;

    /// Describe an image, including any text written in it.
    async fn describe_image(&self, media: &MediaRef) -> Result<String>;
}
