use crate::error::{BurstError, Result};
use crate::types::{PendingKey, PendingMessage, TriggerId, merge_text, next_version};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

/// Typed operations over the key-value store holding one row per sender.
///
/// Every mutation must be a single conditional operation against the backend;
/// no implementation may read, compute and write back as separate steps.
#[async_trait]
pub trait PendingMessageStore: Send + Sync {
    async fn get(&self, key: &PendingKey) -> Result<Option<PendingMessage>>;

    /// Insert a fresh row. Fails with `AlreadyExists` when another ingest won the race.
    async fn create(&self, key: &PendingKey, text: &str, last_update: i64)
    -> Result<PendingMessage>;

    /// Atomically append `fragment` and bump `last_update`. Fails with `NotFound`
    /// when the row was dispatched and deleted concurrently.
    async fn merge(&self, key: &PendingKey, fragment: &str, timestamp: i64)
    -> Result<PendingMessage>;

    /// Record the handle of the scheduled trigger, only while the stored version
    /// still equals `expected_last_update`. Returns false if the row is gone or
    /// a newer fragment has moved it on.
    async fn set_trigger(
        &self,
        key: &PendingKey,
        expected_last_update: i64,
        trigger_id: &TriggerId,
    ) -> Result<bool>;

    /// Delete only if the stored version still equals `expected_last_update`.
    async fn delete_if_current(&self, key: &PendingKey, expected_last_update: i64)
    -> Result<bool>;
}

/// Process-local backend. Each operation holds the shard lock of its key for
/// the whole read-modify-write, which makes it atomic per key.
#[derive(Debug, Default)]
pub struct MemoryPendingStore {
    rows: DashMap<PendingKey, PendingMessage>,
}

impl MemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl PendingMessageStore for MemoryPendingStore {
    async fn get(&self, key: &PendingKey) -> Result<Option<PendingMessage>> {
        Ok(self.rows.get(key).map(|row| row.value().clone()))
    }

    async fn create(
        &self,
        key: &PendingKey,
        text: &str,
        last_update: i64,
    ) -> Result<PendingMessage> {
        match self.rows.entry(key.clone()) {
            Entry::Occupied(_) => Err(BurstError::already_exists(
                &key.tenant_id,
                &key.sender_id,
            )),
            Entry::Vacant(slot) => {
                let row = PendingMessage {
                    tenant_id: key.tenant_id.clone(),
                    sender_id: key.sender_id.clone(),
                    text: merge_text("", text),
                    last_update,
                    pending_trigger_id: None,
                };
                slot.insert(row.clone());
                Ok(row)
            }
        }
    }

    async fn merge(
        &self,
        key: &PendingKey,
        fragment: &str,
        timestamp: i64,
    ) -> Result<PendingMessage> {
        let mut row = self
            .rows
            .get_mut(key)
            .ok_or_else(|| BurstError::not_found(&key.tenant_id, &key.sender_id))?;
        let merged = merge_text(&row.text, fragment);
        row.text = merged;
        row.last_update = next_version(row.last_update, timestamp);
        Ok(row.clone())
    }

    async fn set_trigger(
        &self,
        key: &PendingKey,
        expected_last_update: i64,
        trigger_id: &TriggerId,
    ) -> Result<bool> {
        let Some(mut row) = self.rows.get_mut(key) else {
            return Ok(false);
        };
        if row.last_update != expected_last_update {
            return Ok(false);
        }
        row.pending_trigger_id = Some(trigger_id.clone());
        Ok(true)
    }

    async fn delete_if_current(
        &self,
        key: &PendingKey,
        expected_last_update: i64,
    ) -> Result<bool> {
        Ok(self
            .rows
            .remove_if(key, |_, row| row.last_update == expected_last_update)
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(tenant: &str, sender: &str) -> PendingKey {
        PendingKey::new(tenant, sender)
    }

    #[tokio::test]
    async fn create_rejects_existing_row() {
        let store = MemoryPendingStore::new();
        let k = key("app-1", "5511");
        store.create(&k, "Hi", 10).await.expect("first create");

        let err = store
            .create(&k, "again", 11)
            .await
            .expect_err("second create should race");
        assert!(matches!(err, BurstError::AlreadyExists { .. }));
        let row = store.get(&k).await.expect("get").expect("row present");
        assert_eq!(row.text, "Hi");
        assert_eq!(row.last_update, 10);
    }

    #[tokio::test]
    async fn merge_appends_and_bumps_version() {
        let store = MemoryPendingStore::new();
        let k = key("app-1", "5511");
        store.create(&k, "Hello", 10).await.expect("create");

        let merged = store.merge(&k, "world", 10).await.expect("merge");
        assert_eq!(merged.text, "Hello world");
        assert_eq!(merged.last_update, 11);

        let merged = store.merge(&k, "again", 30).await.expect("merge");
        assert_eq!(merged.text, "Hello world again");
        assert_eq!(merged.last_update, 30);
    }

    #[tokio::test]
    async fn merge_on_missing_row_is_not_found() {
        let store = MemoryPendingStore::new();
        let err = store
            .merge(&key("app-1", "5511"), "late", 10)
            .await
            .expect_err("merge without row");
        assert!(matches!(err, BurstError::NotFound { .. }));
    }

    #[tokio::test]
    async fn delete_if_current_checks_version() {
        let store = MemoryPendingStore::new();
        let k = key("app-1", "5511");
        store.create(&k, "A", 10).await.expect("create");
        store.merge(&k, "B", 20).await.expect("merge");

        assert!(!store.delete_if_current(&k, 10).await.expect("stale delete"));
        assert!(store.get(&k).await.expect("get").is_some());
        assert!(store.delete_if_current(&k, 20).await.expect("current delete"));
        assert!(store.get(&k).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn set_trigger_reports_missing_row() {
        let store = MemoryPendingStore::new();
        let k = key("app-1", "5511");
        let trigger = TriggerId::new("job-1");
        assert!(!store.set_trigger(&k, 10, &trigger).await.expect("set_trigger"));

        store.create(&k, "A", 10).await.expect("create");
        assert!(store.set_trigger(&k, 10, &trigger).await.expect("set_trigger"));
        let row = store.get(&k).await.expect("get").expect("row");
        assert_eq!(row.pending_trigger_id, Some(trigger));
    }

    #[tokio::test]
    async fn set_trigger_ignores_handle_for_superseded_version() {
        let store = MemoryPendingStore::new();
        let k = key("app-1", "5511");
        store.create(&k, "A", 10).await.expect("create");
        store.merge(&k, "B", 20).await.expect("merge");
        assert!(
            store
                .set_trigger(&k, 20, &TriggerId::new("job-new"))
                .await
                .expect("current set_trigger")
        );

        assert!(
            !store
                .set_trigger(&k, 10, &TriggerId::new("job-old"))
                .await
                .expect("stale set_trigger")
        );
        let row = store.get(&k).await.expect("get").expect("row");
        assert_eq!(row.pending_trigger_id.as_deref(), Some("job-new"));
    }

    #[tokio::test]
    async fn tenants_with_same_sender_stay_isolated() {
        let store = MemoryPendingStore::new();
        let a = key("tenant-a", "5511");
        let b = key("tenant-b", "5511");
        store.create(&a, "from a", 10).await.expect("create a");
        store.create(&b, "from b", 10).await.expect("create b");
        store.merge(&a, "more", 11).await.expect("merge a");

        let row_b = store.get(&b).await.expect("get b").expect("row b");
        assert_eq!(row_b.text, "from b");
        assert!(store.delete_if_current(&a, 11).await.expect("delete a"));
        assert!(store.get(&b).await.expect("get b").is_some());
    }

    #[tokio::test]
    async fn concurrent_merges_keep_every_fragment() {
        let store = Arc::new(MemoryPendingStore::new());
        let k = key("app-1", "5511");
        store.create(&k, "m0", 1).await.expect("create");

        let tasks = (1..=32)
            .map(|i| {
                let store = store.clone();
                let k = k.clone();
                tokio::spawn(async move { store.merge(&k, &format!("m{i}"), 1).await })
            })
            .collect::<Vec<_>>();
        for task in futures_util::future::join_all(tasks).await {
            task.expect("join").expect("merge");
        }

        let row = store.get(&k).await.expect("get").expect("row");
        let words: Vec<&str> = row.text.split(' ').collect();
        assert_eq!(words.len(), 33);
        for i in 0..=32 {
            assert!(words.contains(&format!("m{i}").as_str()), "missing m{i}");
        }
        assert_eq!(row.last_update, 33);
    }
}
