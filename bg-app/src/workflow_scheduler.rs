//! Delay scheduler backed by an external workflow service.
//!
//! The service owns the timers. When one elapses it posts the stored payload
//! to `callback_url`, which is this process's `POST /api/v1/triggers`.

use async_trait::async_trait;
use bg_core::{BurstError, CancelOutcome, DelayScheduler, TriggerId, TriggerPayload};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct WorkflowDelayScheduler {
    http: reqwest::Client,
    base_url: String,
    callback_url: String,
}

#[derive(Debug, Serialize)]
struct ScheduleJobRequest<'a> {
    delay_seconds: u64,
    payload: &'a TriggerPayload,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ScheduleJobResponse {
    job_id: String,
}

impl WorkflowDelayScheduler {
    pub fn new(workflow_url: &str, callback_url: &str) -> anyhow::Result<Self> {
        let base_url = workflow_url.trim().trim_end_matches('/');
        if base_url.is_empty() {
            return Err(anyhow::anyhow!("workflow url is required"));
        }
        let callback_url = callback_url.trim();
        if callback_url.is_empty() {
            return Err(anyhow::anyhow!("workflow callback url is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            callback_url: callback_url.to_string(),
        })
    }

    fn jobs_url(&self) -> String {
        format!("{}/jobs", self.base_url)
    }
}

fn unavailable(context: &str, error: impl std::fmt::Display) -> BurstError {
    BurstError::SchedulerUnavailable(format!("{context}: {error}"))
}

#[async_trait]
impl DelayScheduler for WorkflowDelayScheduler {
    #[tracing::instrument(level = "debug", skip_all, fields(tenant_id = %payload.tenant_id, sender_id = %payload.sender_id, last_update = payload.last_update))]
    async fn schedule(
        &self,
        delay: Duration,
        payload: TriggerPayload,
    ) -> bg_core::Result<TriggerId> {
        let body = ScheduleJobRequest {
            delay_seconds: delay.as_secs().max(1),
            payload: &payload,
            callback_url: &self.callback_url,
        };
        let response = self
            .http
            .post(self.jobs_url())
            .json(&body)
            .send()
            .await
            .map_err(|e| unavailable("workflow schedule request", e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| unavailable("workflow schedule response", e))?;
        if !status.is_success() {
            return Err(unavailable(
                "workflow schedule",
                format!("status={status} body={text}"),
            ));
        }
        let parsed: ScheduleJobResponse = serde_json::from_str(&text)
            .map_err(|e| unavailable("workflow schedule response", e))?;
        if parsed.job_id.trim().is_empty() {
            return Err(unavailable("workflow schedule response", "empty job_id"));
        }

        tracing::debug!(job_id = %parsed.job_id, "workflow job scheduled");
        Ok(TriggerId::new(parsed.job_id))
    }

    #[tracing::instrument(level = "debug", skip_all, fields(trigger_id = %trigger_id))]
    async fn cancel(&self, trigger_id: &TriggerId) -> bg_core::Result<CancelOutcome> {
        let response = self
            .http
            .delete(format!("{}/{}", self.jobs_url(), trigger_id))
            .send()
            .await
            .map_err(|e| unavailable("workflow cancel request", e))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => Ok(CancelOutcome::NotFound),
            status if status.is_success() => Ok(CancelOutcome::Cancelled),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(unavailable(
                    "workflow cancel",
                    format!("status={status} body={body}"),
                ))
            }
        }
    }
}
