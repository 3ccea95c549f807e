//! Burstgate configuration loader.

use bg_core::DispatchMode;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BurstgateConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub transcriber: TranscriberConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
    /// Shared secret expected on webhook and trigger routes when set.
    #[serde(default)]
    pub webhook_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
            webhook_token: None,
        }
    }
}

fn default_bind_addr() -> String {
    "0.0.0.0:8088".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    120
}

fn default_http_max_in_flight() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: u64,
    #[serde(default)]
    pub dispatch_mode: DispatchMode,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            delay_seconds: default_delay_seconds(),
            dispatch_mode: DispatchMode::default(),
        }
    }
}

fn default_delay_seconds() -> u64 {
    10
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Default: `~/.burstgate/data/pending.db`
    #[serde(default)]
    pub sqlite_path: Option<String>,
}

impl StoreConfig {
    pub fn resolved_sqlite_path(&self) -> PathBuf {
        self.sqlite_path
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| default_data_dir().join("pending.db"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    #[default]
    InProcess,
    Workflow,
}

impl SchedulerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProcess => "in_process",
            Self::Workflow => "workflow",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub kind: SchedulerKind,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    /// Base URL of the external workflow service (`kind = "workflow"`).
    #[serde(default)]
    pub workflow_url: Option<String>,
    /// Public URL of this service's trigger route, handed to the workflow service.
    #[serde(default)]
    pub callback_url: Option<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kind: SchedulerKind::default(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            workflow_url: None,
            callback_url: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    2_000
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    #[default]
    Log,
    Http,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifierConfig {
    #[serde(default)]
    pub kind: NotifierKind,
    #[serde(default)]
    pub client_token: Option<String>,
    #[serde(default)]
    pub default_url: Option<String>,
    /// tenant id -> send-message endpoint
    #[serde(default)]
    pub tenant_urls: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriberConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_audio_model")]
    pub audio_model: String,
    #[serde(default = "default_image_model")]
    pub image_model: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub image_prompt: Option<String>,
    #[serde(default)]
    pub fallback_text: Option<String>,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            api_base: None,
            audio_model: default_audio_model(),
            image_model: default_image_model(),
            language: None,
            image_prompt: None,
            fallback_text: None,
        }
    }
}

fn default_audio_model() -> String {
    "whisper-1".to_string()
}

fn default_image_model() -> String {
    "gpt-4o-mini".to_string()
}

impl BurstgateConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg = Self::parse(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("BURSTGATE_BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = var("BURSTGATE_DEBOUNCE_SECONDS") {
            match v.trim().parse() {
                Ok(seconds) => self.debounce.delay_seconds = seconds,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring BURSTGATE_DEBOUNCE_SECONDS"),
            }
        }
        if let Some(v) = var("BURSTGATE_WEBHOOK_TOKEN") {
            self.server.webhook_token = Some(v);
        }
        if let Some(v) = var("BURSTGATE_SQLITE_PATH") {
            self.store.sqlite_path = Some(v);
            self.store.backend = StoreBackend::Sqlite;
        }
        if let Some(v) = var("BURSTGATE_CLIENT_TOKEN") {
            self.notifier.client_token = Some(v);
        }
        if let Some(v) = var("OPENAI_API_KEY") {
            self.transcriber.api_key = Some(v);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.bind_addr.trim().is_empty() {
            return Err(anyhow::anyhow!("server.bind_addr is required"));
        }
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.debounce.delay_seconds == 0 {
            return Err(anyhow::anyhow!("debounce.delay_seconds must be > 0"));
        }
        if self.scheduler.max_attempts == 0 {
            return Err(anyhow::anyhow!("scheduler.max_attempts must be > 0"));
        }
        if self.scheduler.kind == SchedulerKind::Workflow {
            if is_blank(self.scheduler.workflow_url.as_deref()) {
                return Err(anyhow::anyhow!(
                    "scheduler.workflow_url is required when scheduler.kind = \"workflow\""
                ));
            }
            if is_blank(self.scheduler.callback_url.as_deref()) {
                return Err(anyhow::anyhow!(
                    "scheduler.callback_url is required when scheduler.kind = \"workflow\""
                ));
            }
        }
        if self.notifier.kind == NotifierKind::Http
            && self.notifier.tenant_urls.is_empty()
            && is_blank(self.notifier.default_url.as_deref())
        {
            return Err(anyhow::anyhow!(
                "notifier.kind = \"http\" needs notifier.default_url or [notifier.tenant_urls]"
            ));
        }
        if self.transcriber.enabled && is_blank(self.transcriber.api_key.as_deref()) {
            return Err(anyhow::anyhow!(
                "transcriber.enabled requires transcriber.api_key or OPENAI_API_KEY"
            ));
        }
        Ok(())
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(str::trim).unwrap_or_default().is_empty()
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".burstgate").join("config.toml")
}

pub fn default_data_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".burstgate").join("data")
}
