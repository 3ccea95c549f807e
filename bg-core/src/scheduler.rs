use crate::error::{BurstError, Result};
use crate::gate::GateOutcome;
use crate::types::{TriggerId, TriggerPayload};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    /// Already fired, already cancelled, or never known. Never fatal.
    NotFound,
}

/// Starts and cancels delayed invocations of the consistency gate.
#[async_trait]
pub trait DelayScheduler: Send + Sync {
    async fn schedule(&self, delay: Duration, payload: TriggerPayload) -> Result<TriggerId>;

    /// Best-effort. Callers must not rely on it for correctness.
    async fn cancel(&self, trigger_id: &TriggerId) -> Result<CancelOutcome>;
}

/// What a scheduler invokes once a delay elapses.
#[async_trait]
pub trait TriggerHandler: Send + Sync {
    async fn on_trigger(&self, payload: TriggerPayload) -> Result<GateOutcome>;
}

/// Redelivery applied by the in-process scheduler when the handler reports a
/// store or scheduler outage. Notifier failures are never redelivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerRetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for TriggerRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// In-process scheduler: one sleeping tokio task per job.
pub struct TokioDelayScheduler {
    handler: Arc<dyn TriggerHandler>,
    jobs: Arc<DashMap<TriggerId, CancellationToken>>,
    shutdown: CancellationToken,
    retry: TriggerRetryPolicy,
}

impl TokioDelayScheduler {
    pub fn new(handler: Arc<dyn TriggerHandler>) -> Self {
        Self {
            handler,
            jobs: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
            retry: TriggerRetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: TriggerRetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Jobs scheduled and not yet fired or cancelled.
    pub fn active_jobs(&self) -> usize {
        self.jobs.len()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.jobs.clear();
    }
}

#[async_trait]
impl DelayScheduler for TokioDelayScheduler {
    #[tracing::instrument(level = "debug", skip_all, fields(tenant_id = %payload.tenant_id, sender_id = %payload.sender_id, last_update = payload.last_update))]
    async fn schedule(&self, delay: Duration, payload: TriggerPayload) -> Result<TriggerId> {
        if self.shutdown.is_cancelled() {
            return Err(BurstError::SchedulerUnavailable(
                "scheduler is shutting down".to_string(),
            ));
        }

        let trigger_id = TriggerId::new(ulid::Ulid::new().to_string());
        let token = self.shutdown.child_token();
        self.jobs.insert(trigger_id.clone(), token.clone());

        let job_id = trigger_id.clone();
        let jobs = self.jobs.clone();
        let handler = self.handler.clone();
        let shutdown = self.shutdown.clone();
        let retry = self.retry;
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(trigger_id = %job_id, "trigger cancelled before firing");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            // Whoever removes the entry first owns the job: cancel() or the firing task.
            if jobs.remove(&job_id).is_none() {
                tracing::debug!(trigger_id = %job_id, "trigger cancelled at fire time");
                return;
            }
            fire_with_retry(handler, payload, retry, shutdown, &job_id).await;
        });

        tracing::debug!(trigger_id = %trigger_id, delay_ms = delay.as_millis() as u64, "trigger scheduled");
        Ok(trigger_id)
    }

    async fn cancel(&self, trigger_id: &TriggerId) -> Result<CancelOutcome> {
        match self.jobs.remove(trigger_id) {
            Some((_, token)) => {
                token.cancel();
                Ok(CancelOutcome::Cancelled)
            }
            None => Ok(CancelOutcome::NotFound),
        }
    }
}

async fn fire_with_retry(
    handler: Arc<dyn TriggerHandler>,
    payload: TriggerPayload,
    retry: TriggerRetryPolicy,
    shutdown: CancellationToken,
    trigger_id: &TriggerId,
) {
    let max_attempts = retry.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match handler.on_trigger(payload.clone()).await {
            Ok(outcome) => {
                tracing::debug!(%trigger_id, attempt, ?outcome, "trigger handled");
                return;
            }
            Err(BurstError::NotifierFailure(reason)) => {
                tracing::warn!(
                    %trigger_id,
                    attempt,
                    tenant_id = %payload.tenant_id,
                    sender_id = %payload.sender_id,
                    error = %reason,
                    "notifier failed; pending row kept, no automatic redelivery"
                );
                return;
            }
            Err(e) if e.is_redeliverable() && attempt < max_attempts => {
                tracing::warn!(%trigger_id, attempt, error = %e, "trigger handler failed; redelivering");
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(retry.backoff) => {}
                }
            }
            Err(e) => {
                tracing::error!(
                    %trigger_id,
                    attempt,
                    tenant_id = %payload.tenant_id,
                    sender_id = %payload.sender_id,
                    error = %e,
                    "trigger handler failed; dropping job"
                );
                return;
            }
        }
    }
}
