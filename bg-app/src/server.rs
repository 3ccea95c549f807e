//! Burstgate server.
//!
//! Builds the store, scheduler, gate and ingest coordinator from config and
//! mounts the HTTP routes on top.

use crate::config::{
    BurstgateConfig, NotifierKind, SchedulerKind, ServerConfig, StoreBackend, TranscriberConfig,
};
use crate::http_auth::{self, WebhookTokenPolicy};
use crate::routes;
use crate::workflow_scheduler::WorkflowDelayScheduler;
use anyhow::Result;
use axum::Extension;
use axum::Router;
use axum::http::HeaderMap;
use axum::http::Request;
use axum::http::StatusCode;
use axum::response::Response;
use bg_channels::{HttpNotifier, LogNotifier};
use bg_core::{
    ConsistencyGate, DelayScheduler, DispatchMode, Dispatcher, IngestCoordinator,
    MemoryPendingStore, Notifier, PendingMessageStore, SqlitePendingStore, TokioDelayScheduler,
    TriggerRetryPolicy,
};
use bg_transcribe::{ContentTranscriber, DisabledTranscriber, FallbackTranscriber, OpenAiTranscriber};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub enum SchedulerRuntime {
    InProcess(Arc<TokioDelayScheduler>),
    Workflow(Arc<WorkflowDelayScheduler>),
}

impl SchedulerRuntime {
    pub fn kind(&self) -> SchedulerKind {
        match self {
            Self::InProcess(_) => SchedulerKind::InProcess,
            Self::Workflow(_) => SchedulerKind::Workflow,
        }
    }

    /// Only known for the in-process scheduler.
    pub fn active_jobs(&self) -> Option<usize> {
        match self {
            Self::InProcess(scheduler) => Some(scheduler.active_jobs()),
            Self::Workflow(_) => None,
        }
    }

    fn as_delay_scheduler(&self) -> Arc<dyn DelayScheduler> {
        match self {
            Self::InProcess(scheduler) => scheduler.clone(),
            Self::Workflow(scheduler) => scheduler.clone(),
        }
    }

    pub fn shutdown(&self) {
        if let Self::InProcess(scheduler) = self {
            let dropped = scheduler.active_jobs();
            scheduler.shutdown();
            if dropped > 0 {
                tracing::warn!(
                    dropped_jobs = dropped,
                    "in-process triggers dropped at shutdown; their rows dispatch with the next fragment"
                );
            }
        }
    }
}

pub struct AppState {
    pub store: Arc<dyn PendingMessageStore>,
    pub store_backend: StoreBackend,
    pub gate: Arc<ConsistencyGate>,
    pub coordinator: IngestCoordinator,
    pub scheduler: SchedulerRuntime,
    pub transcriber: Arc<dyn ContentTranscriber>,
    pub dispatch_mode: DispatchMode,
    pub started_at: Instant,
}

impl AppState {
    pub fn from_config(cfg: &BurstgateConfig, shutdown: CancellationToken) -> Result<Arc<Self>> {
        let store = build_store(cfg)?;
        let notifier = build_notifier(cfg)?;
        let transcriber = build_transcriber(&cfg.transcriber)?;
        Self::assemble(cfg, store, notifier, transcriber, shutdown)
    }

    pub fn assemble(
        cfg: &BurstgateConfig,
        store: Arc<dyn PendingMessageStore>,
        notifier: Arc<dyn Notifier>,
        transcriber: Arc<dyn ContentTranscriber>,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>> {
        let dispatcher =
            Dispatcher::new(store.clone(), notifier).with_mode(cfg.debounce.dispatch_mode);
        let gate = Arc::new(ConsistencyGate::new(store.clone(), dispatcher));

        let scheduler = match cfg.scheduler.kind {
            SchedulerKind::InProcess => SchedulerRuntime::InProcess(Arc::new(
                TokioDelayScheduler::new(gate.clone())
                    .with_retry_policy(TriggerRetryPolicy {
                        max_attempts: cfg.scheduler.max_attempts,
                        backoff: Duration::from_millis(cfg.scheduler.retry_backoff_ms),
                    })
                    .with_shutdown(shutdown.child_token()),
            )),
            SchedulerKind::Workflow => SchedulerRuntime::Workflow(Arc::new(
                WorkflowDelayScheduler::new(
                    cfg.scheduler.workflow_url.as_deref().unwrap_or_default(),
                    cfg.scheduler.callback_url.as_deref().unwrap_or_default(),
                )?,
            )),
        };

        let coordinator = IngestCoordinator::new(
            store.clone(),
            scheduler.as_delay_scheduler(),
            Duration::from_secs(cfg.debounce.delay_seconds),
        );

        Ok(Arc::new(Self {
            store,
            store_backend: cfg.store.backend,
            gate,
            coordinator,
            scheduler,
            transcriber,
            dispatch_mode: cfg.debounce.dispatch_mode,
            started_at: Instant::now(),
        }))
    }
}

fn build_store(cfg: &BurstgateConfig) -> Result<Arc<dyn PendingMessageStore>> {
    match cfg.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryPendingStore::new())),
        StoreBackend::Sqlite => {
            let path = expand_home(&cfg.store.resolved_sqlite_path())?;
            let store = SqlitePendingStore::open(&path)
                .map_err(|e| anyhow::anyhow!("open sqlite store {}: {e}", path.display()))?;
            tracing::info!(path = %path.display(), "sqlite pending store opened");
            Ok(Arc::new(store))
        }
    }
}

fn build_notifier(cfg: &BurstgateConfig) -> Result<Arc<dyn Notifier>> {
    match cfg.notifier.kind {
        NotifierKind::Log => Ok(Arc::new(LogNotifier)),
        NotifierKind::Http => {
            let notifier = HttpNotifier::new(cfg.notifier.client_token.clone())?
                .with_tenant_urls(&cfg.notifier.tenant_urls)?
                .with_default_url(cfg.notifier.default_url.as_deref())?;
            Ok(Arc::new(notifier))
        }
    }
}

fn build_transcriber(cfg: &TranscriberConfig) -> Result<Arc<dyn ContentTranscriber>> {
    let fallback_text = cfg.fallback_text.clone().unwrap_or_default();
    if !cfg.enabled {
        return Ok(Arc::new(
            FallbackTranscriber::new(DisabledTranscriber).with_fallback_text(fallback_text),
        ));
    }

    let api_key = cfg.api_key.as_deref().unwrap_or_default();
    let mut openai = OpenAiTranscriber::new(api_key)?
        .with_audio_model(&cfg.audio_model)
        .with_image_model(&cfg.image_model)
        .with_language(cfg.language.clone());
    if let Some(api_base) = cfg.api_base.as_deref() {
        openai = openai.with_api_base(api_base);
    }
    if let Some(prompt) = cfg.image_prompt.as_deref() {
        openai = openai.with_image_prompt(prompt);
    }
    Ok(Arc::new(
        FallbackTranscriber::new(openai).with_fallback_text(fallback_text),
    ))
}

pub fn build_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri().path(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    routes::router()
        .layer(axum::middleware::from_fn(http_auth::require_webhook_token))
        .layer(Extension(WebhookTokenPolicy::new(
            server.webhook_token.as_deref(),
        )))
        .layer(Extension(state))
        .layer(GlobalConcurrencyLimitLayer::new(server.http_max_in_flight))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = BurstgateConfig::load(config_path).await?;
    let addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", cfg.server.bind_addr))?;
    let listener = preflight_bind_listener(addr).await?;

    let shutdown = CancellationToken::new();
    let state = AppState::from_config(&cfg, shutdown.clone())?;
    // TODO: re-arm triggers for sqlite rows that outlived a restart once the
    // store can list pending keys; today they dispatch with the next fragment.
    let app = build_router(state.clone(), &cfg.server);

    tracing::info!(
        %addr,
        store = state.store_backend.as_str(),
        scheduler = state.scheduler.kind().as_str(),
        debounce_seconds = cfg.debounce.delay_seconds,
        dispatch_mode = ?cfg.debounce.dispatch_mode,
        "burstgate serving"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    state.scheduler.shutdown();
    Ok(())
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let path = config_path.unwrap_or_else(crate::config::default_config_path);
    let cfg = BurstgateConfig::load(Some(path.clone())).await?;
    let _addr: SocketAddr = cfg
        .server
        .bind_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", cfg.server.bind_addr))?;
    let state = AppState::from_config(&cfg, CancellationToken::new())?;
    tracing::info!(
        config_path = %path.display(),
        bind_addr = %cfg.server.bind_addr,
        store = state.store_backend.as_str(),
        scheduler = state.scheduler.kind().as_str(),
        notifier = ?cfg.notifier.kind,
        transcriber_enabled = cfg.transcriber.enabled,
        webhook_token = cfg.server.webhook_token.is_some(),
        "config ok"
    );
    state.scheduler.shutdown();
    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn expand_home(path: &std::path::Path) -> Result<PathBuf> {
    let Some(rest) = path.to_str().and_then(|p| p.strip_prefix("~/")) else {
        return Ok(path.to_path_buf());
    };
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(home).join(rest))
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
