use crate::error::{Result, TranscribeError};
use crate::traits::ContentTranscriber;
use crate::types::{MediaRef, base64_body};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_AUDIO_MODEL: &str = "whisper-1";
const DEFAULT_IMAGE_MODEL: &str = "gpt-4o-mini";
const DEFAULT_IMAGE_PROMPT: &str =
    "Describe what is in this image. If it contains text, say what is written.";
const AUDIO_FILE_NAME: &str = "audio.mp3";

#[derive(Clone)]
pub struct OpenAiTranscriber {
    http: reqwest::Client,
    api_key: String,
    api_base: String,
    audio_model: String,
    image_model: String,
    language: Option<String>,
    image_prompt: String,
}

impl OpenAiTranscriber {
    pub fn new(api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(TranscribeError::InvalidInput(
                "openai api key is required".to_string(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            api_base: OPENAI_API_BASE.to_string(),
            audio_model: DEFAULT_AUDIO_MODEL.to_string(),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            language: None,
            image_prompt: DEFAULT_IMAGE_PROMPT.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_audio_model(mut self, model: &str) -> Self {
        self.audio_model = model.to_string();
        self
    }

    pub fn with_image_model(mut self, model: &str) -> Self {
        self.image_model = model.to_string();
        self
    }

    /// ISO-639-1 hint for speech recognition, e.g. `pt`.
    pub fn with_language(mut self, language: Option<String>) -> Self {
        self.language = language.filter(|l| !l.trim().is_empty());
        self
    }

    pub fn with_image_prompt(mut self, prompt: &str) -> Self {
        self.image_prompt = prompt.to_string();
        self
    }

    async fn media_bytes(&self, media: &MediaRef) -> Result<Vec<u8>> {
        match media {
            MediaRef::Base64(data) => Ok(STANDARD.decode(base64_body(data))?),
            MediaRef::Url(url) => {
                let response = self.http.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(TranscribeError::Http(format!(
                        "media download status={status} url={url}"
                    )));
                }
                Ok(response.bytes().await?.to_vec())
            }
        }
    }
}

#[async_trait]
impl ContentTranscriber for OpenAiTranscriber {
    #[tracing::instrument(level = "info", skip_all, fields(model = %self.audio_model))]
    async fn transcribe_audio(&self, media: &MediaRef) -> Result<String> {
        if media.is_empty() {
            return Ok(String::new());
        }
        let bytes = self.media_bytes(media).await?;

        let file = reqwest::multipart::Part::bytes(bytes)
            .file_name(AUDIO_FILE_NAME)
            .mime_str("audio/mpeg")?;
        let mut form = reqwest::multipart::Form::new()
            .text("model", self.audio_model.clone())
            .part("file", file);
        if let Some(language) = self.language.as_ref() {
            form = form.text("language", language.clone());
        }

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.api_base))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TranscribeError::Http(format!(
                "openai transcription status={status} body={body}"
            )));
        }
        parse_transcription(&body)
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.image_model))]
    async fn describe_image(&self, media: &MediaRef) -> Result<String> {
        if media.is_empty() {
            return Ok(String::new());
        }
        let req = VisionRequest::new(&self.image_model, &self.image_prompt, image_url(media));

        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TranscribeError::Http(format!(
                "openai vision status={status} body={body}"
            )));
        }
        parse_chat_content(&body)
    }
}

fn image_url(media: &MediaRef) -> String {
    match media {
        MediaRef::Base64(data) if data.trim_start().starts_with("data:") => data.trim().to_string(),
        MediaRef::Base64(data) => format!("data:image/jpeg;base64,{}", data.trim()),
        MediaRef::Url(url) => url.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

fn parse_transcription(body: &str) -> Result<String> {
    let parsed: TranscriptionResponse = serde_json::from_str(body)?;
    Ok(parsed.text.trim().to_string())
}

#[derive(Debug, Serialize)]
struct VisionRequest {
    model: String,
    messages: Vec<VisionMessage>,
}

#[derive(Debug, Serialize)]
struct VisionMessage {
    role: &'static str,
    content: Vec<VisionPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum VisionPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

impl VisionRequest {
    fn new(model: &str, prompt: &str, url: String) -> Self {
        Self {
            model: model.to_string(),
            messages: vec![VisionMessage {
                role: "user",
                content: vec![
                    VisionPart::Text {
                        text: prompt.to_string(),
                    },
                    VisionPart::ImageUrl {
                        image_url: ImageUrl { url },
                    },
                ],
            }],
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

fn parse_chat_content(body: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body)?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|c| c.trim().to_string())
        .ok_or_else(|| TranscribeError::ResponseFormat("openai vision: no content".to_string()))
}
