//! Deterministic doubles for the scheduler, notifier and clock.

use crate::clock::Clock;
use crate::error::{BurstError, Result};
use crate::notifier::Notifier;
use crate::scheduler::{CancelOutcome, DelayScheduler};
use crate::types::{SenderId, TenantId, TriggerId, TriggerPayload};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub trigger_id: TriggerId,
    pub delay: Duration,
    pub payload: TriggerPayload,
}

/// Records jobs instead of running them; tests fire them through the gate.
#[derive(Default)]
pub struct FakeScheduler {
    next_id: AtomicU64,
    scheduled: Mutex<Vec<ScheduledJob>>,
    cancelled: Mutex<HashSet<TriggerId>>,
    fail_cancellations: bool,
    unavailable: bool,
}

impl FakeScheduler {
    pub fn failing_cancellations() -> Self {
        Self {
            fail_cancellations: true,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn scheduled(&self) -> Vec<ScheduledJob> {
        self.scheduled.lock().expect("scheduled lock").clone()
    }

    pub fn cancelled(&self) -> Vec<TriggerId> {
        let mut ids: Vec<TriggerId> = self
            .cancelled
            .lock()
            .expect("cancelled lock")
            .iter()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Payloads of jobs that were never cancelled, in schedule order.
    pub fn live_payloads(&self) -> Vec<TriggerPayload> {
        let cancelled = self.cancelled.lock().expect("cancelled lock").clone();
        self.scheduled()
            .into_iter()
            .filter(|job| !cancelled.contains(&job.trigger_id))
            .map(|job| job.payload)
            .collect()
    }
}

#[async_trait]
impl DelayScheduler for FakeScheduler {
    async fn schedule(&self, delay: Duration, payload: TriggerPayload) -> Result<TriggerId> {
        if self.unavailable {
            return Err(BurstError::SchedulerUnavailable("fake outage".to_string()));
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let trigger_id = TriggerId::new(format!("job-{n:04}"));
        self.scheduled
            .lock()
            .expect("scheduled lock")
            .push(ScheduledJob {
                trigger_id: trigger_id.clone(),
                delay,
                payload,
            });
        Ok(trigger_id)
    }

    async fn cancel(&self, trigger_id: &TriggerId) -> Result<CancelOutcome> {
        if self.fail_cancellations {
            return Err(BurstError::SchedulerUnavailable("cancel dropped".to_string()));
        }
        let known = self
            .scheduled
            .lock()
            .expect("scheduled lock")
            .iter()
            .any(|job| &job.trigger_id == trigger_id);
        if known && self.cancelled.lock().expect("cancelled lock").insert(trigger_id.clone()) {
            Ok(CancelOutcome::Cancelled)
        } else {
            Ok(CancelOutcome::NotFound)
        }
    }
}

#[derive(Debug)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn at(seconds: i64) -> Self {
        Self(AtomicI64::new(seconds))
    }

    pub fn advance(&self, seconds: i64) {
        self.0.fetch_add(seconds, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tenant_id: TenantId,
    pub sender_id: SenderId,
    pub text: String,
}

#[derive(Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<Delivery>>,
    failing: AtomicBool,
    attempts: AtomicU64,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every `send` call, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().expect("deliveries lock").clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.deliveries().into_iter().map(|d| d.text).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, tenant_id: &TenantId, sender_id: &SenderId, text: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(BurstError::NotifierFailure("downstream rejected".to_string()));
        }
        self.deliveries
            .lock()
            .expect("deliveries lock")
            .push(Delivery {
                tenant_id: tenant_id.clone(),
                sender_id: sender_id.clone(),
                text: text.to_string(),
            });
        Ok(())
    }
}
