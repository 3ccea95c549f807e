use crate::clock::{Clock, SystemClock};
use crate::error::{BurstError, Result};
use crate::scheduler::{CancelOutcome, DelayScheduler};
use crate::store::PendingMessageStore;
use crate::types::{PendingKey, PendingMessage, SenderId, TenantId, TriggerId, TriggerPayload};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// One normalized inbound fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestRequest {
    pub tenant_id: TenantId,
    pub sender_id: SenderId,
    pub text: String,
}

impl IngestRequest {
    pub fn new(
        tenant_id: impl Into<TenantId>,
        sender_id: impl Into<SenderId>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            sender_id: sender_id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReceipt {
    pub pending: PendingMessage,
    pub trigger_id: TriggerId,
    /// True when this fragment opened a new burst.
    pub created: bool,
}

/// Folds each fragment into the sender's pending row and re-arms the delayed trigger.
pub struct IngestCoordinator {
    store: Arc<dyn PendingMessageStore>,
    scheduler: Arc<dyn DelayScheduler>,
    clock: Arc<dyn Clock>,
    delay: Duration,
}

impl IngestCoordinator {
    pub fn new(
        store: Arc<dyn PendingMessageStore>,
        scheduler: Arc<dyn DelayScheduler>,
        delay: Duration,
    ) -> Self {
        Self {
            store,
            scheduler,
            clock: Arc::new(SystemClock),
            delay,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(tenant_id = %request.tenant_id, sender_id = %request.sender_id)
    )]
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestReceipt> {
        if request.tenant_id.trim().is_empty() {
            return Err(BurstError::InvalidInput("tenant_id is required".to_string()));
        }
        if request.sender_id.trim().is_empty() {
            return Err(BurstError::InvalidInput("sender_id is required".to_string()));
        }
        let text = request.text.trim();
        if text.is_empty() {
            return Err(BurstError::InvalidInput("message text is empty".to_string()));
        }

        let key = PendingKey::new(request.tenant_id.clone(), request.sender_id.clone());
        let (mut pending, created) = self.upsert(&key, text).await?;

        let trigger_id = self
            .scheduler
            .schedule(self.delay, TriggerPayload::for_message(&pending))
            .await?;
        if self
            .store
            .set_trigger(&key, pending.last_update, &trigger_id)
            .await?
        {
            pending.pending_trigger_id = Some(trigger_id.clone());
        } else {
            // The row was dispatched or a newer fragment re-armed it; this job is stale.
            tracing::debug!(%trigger_id, "row moved on before trigger handle was recorded");
            self.cancel_quietly(&trigger_id).await;
        }

        tracing::info!(
            last_update = pending.last_update,
            %trigger_id,
            created,
            "fragment ingested"
        );
        Ok(IngestReceipt {
            pending,
            trigger_id,
            created,
        })
    }

    async fn upsert(&self, key: &PendingKey, text: &str) -> Result<(PendingMessage, bool)> {
        let now = self.clock.now_seconds();
        match self.store.get(key).await? {
            Some(existing) => match self.merge_into(key, &existing, text, now).await {
                Ok(merged) => Ok((merged, false)),
                Err(BurstError::NotFound { .. }) => {
                    tracing::debug!("pending row dispatched mid-merge; opening a new burst");
                    let created = self.store.create(key, text, now).await.map_err(|e| {
                        Self::as_contention(key, e, |e| matches!(e, BurstError::AlreadyExists { .. }))
                    })?;
                    Ok((created, true))
                }
                Err(e) => Err(e),
            },
            None => match self.store.create(key, text, now).await {
                Ok(created) => Ok((created, true)),
                Err(BurstError::AlreadyExists { .. }) => {
                    tracing::debug!("concurrent first fragment created the row; merging");
                    let existing = self
                        .store
                        .get(key)
                        .await?
                        .ok_or_else(|| BurstError::contention(&key.tenant_id, &key.sender_id))?;
                    let merged = self
                        .merge_into(key, &existing, text, now)
                        .await
                        .map_err(|e| {
                            Self::as_contention(key, e, |e| matches!(e, BurstError::NotFound { .. }))
                        })?;
                    Ok((merged, false))
                }
                Err(e) => Err(e),
            },
        }
    }

    async fn merge_into(
        &self,
        key: &PendingKey,
        existing: &PendingMessage,
        text: &str,
        now: i64,
    ) -> Result<PendingMessage> {
        if let Some(trigger_id) = &existing.pending_trigger_id {
            self.cancel_quietly(trigger_id).await;
        }
        self.store.merge(key, text, now).await
    }

    async fn cancel_quietly(&self, trigger_id: &TriggerId) {
        match self.scheduler.cancel(trigger_id).await {
            Ok(CancelOutcome::Cancelled) => {
                tracing::debug!(%trigger_id, "previous trigger cancelled");
            }
            Ok(CancelOutcome::NotFound) => {
                tracing::debug!(%trigger_id, "previous trigger already fired or cancelled");
            }
            Err(e) => {
                tracing::warn!(%trigger_id, error = %e, "previous trigger cancel failed; gate will discard it");
            }
        }
    }

    fn as_contention(
        key: &PendingKey,
        error: BurstError,
        lost_race: impl Fn(&BurstError) -> bool,
    ) -> BurstError {
        if lost_race(&error) {
            BurstError::contention(&key.tenant_id, &key.sender_id)
        } else {
            error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryPendingStore;
    use crate::test_support::{FakeScheduler, ManualClock};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Serves scripted `get` snapshots before delegating, to force the race paths.
    /// An optional concurrent fragment lands right before the next `set_trigger`.
    struct ScriptedStore {
        inner: MemoryPendingStore,
        snapshots: Mutex<VecDeque<Option<PendingMessage>>>,
        concurrent_fragment: Mutex<Option<(String, TriggerId)>>,
    }

    impl ScriptedStore {
        fn new(snapshots: Vec<Option<PendingMessage>>) -> Self {
            Self {
                inner: MemoryPendingStore::new(),
                snapshots: Mutex::new(snapshots.into()),
                concurrent_fragment: Mutex::new(None),
            }
        }

        fn with_concurrent_fragment(self, text: &str, trigger_id: &str) -> Self {
            *self.concurrent_fragment.lock().expect("fragment lock") =
                Some((text.to_string(), TriggerId::new(trigger_id)));
            self
        }
    }

    #[async_trait]
    impl PendingMessageStore for ScriptedStore {
        async fn get(&self, key: &PendingKey) -> Result<Option<PendingMessage>> {
            let scripted = self.snapshots.lock().expect("snapshots lock").pop_front();
            match scripted {
                Some(snapshot) => Ok(snapshot),
                None => self.inner.get(key).await,
            }
        }

        async fn create(&self, key: &PendingKey, text: &str, ts: i64) -> Result<PendingMessage> {
            self.inner.create(key, text, ts).await
        }

        async fn merge(&self, key: &PendingKey, text: &str, ts: i64) -> Result<PendingMessage> {
            self.inner.merge(key, text, ts).await
        }

        async fn set_trigger(
            &self,
            key: &PendingKey,
            expected_last_update: i64,
            trigger_id: &TriggerId,
        ) -> Result<bool> {
            let concurrent = self.concurrent_fragment.lock().expect("fragment lock").take();
            if let Some((text, other_trigger)) = concurrent {
                let merged = self.inner.merge(key, &text, expected_last_update).await?;
                self.inner
                    .set_trigger(key, merged.last_update, &other_trigger)
                    .await?;
            }
            self.inner
                .set_trigger(key, expected_last_update, trigger_id)
                .await
        }

        async fn delete_if_current(&self, key: &PendingKey, expected: i64) -> Result<bool> {
            self.inner.delete_if_current(key, expected).await
        }
    }

    fn coordinator(
        store: Arc<dyn PendingMessageStore>,
        scheduler: Arc<FakeScheduler>,
        clock: Arc<ManualClock>,
    ) -> IngestCoordinator {
        IngestCoordinator::new(store, scheduler, Duration::from_secs(10)).with_clock(clock)
    }

    #[tokio::test]
    async fn first_fragment_creates_row_and_schedules_current_version() {
        let store = Arc::new(MemoryPendingStore::new());
        let scheduler = Arc::new(FakeScheduler::default());
        let clock = Arc::new(ManualClock::at(1_000));
        let coordinator = coordinator(store.clone(), scheduler.clone(), clock);

        let receipt = coordinator
            .ingest(IngestRequest::new("app-1", "5511", "  Hello "))
            .await
            .expect("ingest");
        assert!(receipt.created);
        assert_eq!(receipt.pending.text, "Hello");
        assert_eq!(receipt.pending.last_update, 1_000);

        let scheduled = scheduler.scheduled();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].delay, Duration::from_secs(10));
        assert_eq!(scheduled[0].payload.last_update, 1_000);
        assert_eq!(scheduled[0].trigger_id, receipt.trigger_id);

        let row = store
            .get(&PendingKey::new("app-1", "5511"))
            .await
            .expect("get")
            .expect("row");
        assert_eq!(row.pending_trigger_id, Some(receipt.trigger_id));
    }

    #[tokio::test]
    async fn next_fragment_cancels_previous_trigger_and_merges() {
        let store = Arc::new(MemoryPendingStore::new());
        let scheduler = Arc::new(FakeScheduler::default());
        let clock = Arc::new(ManualClock::at(1_000));
        let coordinator = coordinator(store.clone(), scheduler.clone(), clock.clone());

        let first = coordinator
            .ingest(IngestRequest::new("app-1", "5511", "Hello"))
            .await
            .expect("first ingest");
        clock.advance(1);
        let second = coordinator
            .ingest(IngestRequest::new("app-1", "5511", "world"))
            .await
            .expect("second ingest");

        assert!(!second.created);
        assert_eq!(second.pending.text, "Hello world");
        assert_eq!(second.pending.last_update, 1_001);
        assert_eq!(scheduler.cancelled(), vec![first.trigger_id]);
        assert_eq!(scheduler.scheduled()[1].payload.last_update, 1_001);
    }

    #[tokio::test]
    async fn same_second_fragments_still_get_distinct_versions() {
        let store = Arc::new(MemoryPendingStore::new());
        let scheduler = Arc::new(FakeScheduler::default());
        let clock = Arc::new(ManualClock::at(500));
        let coordinator = coordinator(store, scheduler.clone(), clock);

        for text in ["a", "b", "c"] {
            coordinator
                .ingest(IngestRequest::new("app-1", "5511", text))
                .await
                .expect("ingest");
        }
        let versions: Vec<i64> = scheduler
            .scheduled()
            .iter()
            .map(|job| job.payload.last_update)
            .collect();
        assert_eq!(versions, vec![500, 501, 502]);
    }

    #[tokio::test]
    async fn failed_cancellation_does_not_block_ingest() {
        let store = Arc::new(MemoryPendingStore::new());
        let scheduler = Arc::new(FakeScheduler::failing_cancellations());
        let clock = Arc::new(ManualClock::at(10));
        let coordinator = coordinator(store, scheduler.clone(), clock);

        coordinator
            .ingest(IngestRequest::new("app-1", "5511", "A"))
            .await
            .expect("first ingest");
        let receipt = coordinator
            .ingest(IngestRequest::new("app-1", "5511", "B"))
            .await
            .expect("second ingest despite cancel failure");
        assert_eq!(receipt.pending.text, "A B");
        assert!(scheduler.cancelled().is_empty());
    }

    #[tokio::test]
    async fn create_race_falls_back_to_merge() {
        let store = Arc::new(ScriptedStore::new(vec![None]));
        let key = PendingKey::new("app-1", "5511");
        store.inner.create(&key, "winner", 5).await.expect("seed row");

        let scheduler = Arc::new(FakeScheduler::default());
        let clock = Arc::new(ManualClock::at(5));
        let coordinator = coordinator(store.clone(), scheduler, clock);
        let receipt = coordinator
            .ingest(IngestRequest::new("app-1", "5511", "loser"))
            .await
            .expect("ingest");

        assert!(!receipt.created);
        assert_eq!(receipt.pending.text, "winner loser");
        assert_eq!(receipt.pending.last_update, 6);
    }

    #[tokio::test]
    async fn merge_race_with_dispatch_falls_back_to_create() {
        let ghost = PendingMessage {
            tenant_id: "app-1".into(),
            sender_id: "5511".into(),
            text: "already dispatched".to_string(),
            last_update: 3,
            pending_trigger_id: None,
        };
        let store = Arc::new(ScriptedStore::new(vec![Some(ghost)]));
        let scheduler = Arc::new(FakeScheduler::default());
        let clock = Arc::new(ManualClock::at(9));
        let coordinator = coordinator(store, scheduler, clock);

        let receipt = coordinator
            .ingest(IngestRequest::new("app-1", "5511", "fresh"))
            .await
            .expect("ingest");
        assert!(receipt.created);
        assert_eq!(receipt.pending.text, "fresh");
        assert_eq!(receipt.pending.last_update, 9);
    }

    #[tokio::test]
    async fn losing_both_races_surfaces_contention() {
        // get: absent, create: AlreadyExists, re-get: absent again.
        let store = Arc::new(ScriptedStore::new(vec![None, None]));
        let key = PendingKey::new("app-1", "5511");
        store.inner.create(&key, "other", 1).await.expect("seed row");

        let coordinator = coordinator(
            store,
            Arc::new(FakeScheduler::default()),
            Arc::new(ManualClock::at(2)),
        );
        let err = coordinator
            .ingest(IngestRequest::new("app-1", "5511", "x"))
            .await
            .expect_err("double race");
        assert!(matches!(err, BurstError::Contention { .. }));
    }

    #[tokio::test]
    async fn superseded_trigger_handle_is_not_recorded_and_gets_cancelled() {
        // A newer fragment merges and records its own trigger between this
        // ingest's schedule and set_trigger.
        let store = Arc::new(
            ScriptedStore::new(vec![]).with_concurrent_fragment("world", "job-newer"),
        );
        let scheduler = Arc::new(FakeScheduler::default());
        let coordinator = coordinator(
            store.clone(),
            scheduler.clone(),
            Arc::new(ManualClock::at(100)),
        );

        let receipt = coordinator
            .ingest(IngestRequest::new("app-1", "5511", "Hello"))
            .await
            .expect("ingest");
        assert_eq!(receipt.pending.last_update, 100);
        assert_eq!(receipt.pending.pending_trigger_id, None);

        let row = store
            .get(&PendingKey::new("app-1", "5511"))
            .await
            .expect("get")
            .expect("row");
        assert_eq!(row.text, "Hello world");
        assert_eq!(row.last_update, 101);
        assert_eq!(row.pending_trigger_id.as_deref(), Some("job-newer"));
        assert_eq!(scheduler.cancelled(), vec![receipt.trigger_id]);
        assert!(scheduler.live_payloads().is_empty());
    }

    #[tokio::test]
    async fn blank_input_is_rejected_without_touching_the_store() {
        let store = Arc::new(MemoryPendingStore::new());
        let scheduler = Arc::new(FakeScheduler::default());
        let coordinator = coordinator(store.clone(), scheduler.clone(), Arc::new(ManualClock::at(1)));

        for request in [
            IngestRequest::new("", "5511", "hi"),
            IngestRequest::new("app-1", " ", "hi"),
            IngestRequest::new("app-1", "5511", "   "),
        ] {
            let err = coordinator.ingest(request).await.expect_err("blank input");
            assert!(matches!(err, BurstError::InvalidInput(_)));
        }
        assert!(store.is_empty());
        assert!(scheduler.scheduled().is_empty());
    }

    #[tokio::test]
    async fn scheduler_outage_is_surfaced_to_the_caller() {
        let store = Arc::new(MemoryPendingStore::new());
        let scheduler = Arc::new(FakeScheduler::unavailable());
        let coordinator = coordinator(store, scheduler, Arc::new(ManualClock::at(1)));

        let err = coordinator
            .ingest(IngestRequest::new("app-1", "5511", "hi"))
            .await
            .expect_err("scheduler down");
        assert!(matches!(err, BurstError::SchedulerUnavailable(_)));
    }
}
