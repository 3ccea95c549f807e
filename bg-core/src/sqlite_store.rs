use crate::error::{BurstError, Result};
use crate::store::PendingMessageStore;
use crate::types::{PendingKey, PendingMessage, SenderId, TenantId, TriggerId, merge_text};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::path::Path;
use std::sync::{Arc, Mutex};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_messages (
    tenant_id TEXT NOT NULL,
    sender_id TEXT NOT NULL,
    text TEXT NOT NULL,
    last_update INTEGER NOT NULL,
    pending_trigger_id TEXT,
    PRIMARY KEY (tenant_id, sender_id)
)
"#;

/// SQLite-backed store. Conditional writes are expressed in SQL so that each
/// operation is one statement (or one IMMEDIATE transaction) against the file.
#[derive(Clone)]
pub struct SqlitePendingStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePendingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BurstError::StoreUnavailable(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| {
                BurstError::StoreUnavailable("sqlite connection mutex poisoned".to_string())
            })?;
            f(&mut guard)
        })
        .await?
    }
}

fn read_row(conn: &Connection, key: &PendingKey) -> rusqlite::Result<Option<PendingMessage>> {
    conn.query_row(
        r#"
SELECT text, last_update, pending_trigger_id
  FROM pending_messages
 WHERE tenant_id = ?1
   AND sender_id = ?2
"#,
        params![key.tenant_id.as_str(), key.sender_id.as_str()],
        |row| {
            Ok(PendingMessage {
                tenant_id: TenantId::new(key.tenant_id.as_str()),
                sender_id: SenderId::new(key.sender_id.as_str()),
                text: row.get(0)?,
                last_update: row.get(1)?,
                pending_trigger_id: row.get::<_, Option<String>>(2)?.map(TriggerId::from),
            })
        },
    )
    .optional()
}

#[async_trait]
impl PendingMessageStore for SqlitePendingStore {
    async fn get(&self, key: &PendingKey) -> Result<Option<PendingMessage>> {
        let key = key.clone();
        self.with_conn(move |conn| Ok(read_row(conn, &key)?)).await
    }

    async fn create(
        &self,
        key: &PendingKey,
        text: &str,
        last_update: i64,
    ) -> Result<PendingMessage> {
        let key = key.clone();
        let text = merge_text("", text);
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                r#"
INSERT OR IGNORE INTO pending_messages (tenant_id, sender_id, text, last_update)
VALUES (?1, ?2, ?3, ?4)
"#,
                params![key.tenant_id.as_str(), key.sender_id.as_str(), text, last_update],
            )?;
            if inserted == 0 {
                return Err(BurstError::already_exists(&key.tenant_id, &key.sender_id));
            }
            Ok(PendingMessage {
                tenant_id: key.tenant_id,
                sender_id: key.sender_id,
                text,
                last_update,
                pending_trigger_id: None,
            })
        })
        .await
    }

    async fn merge(
        &self,
        key: &PendingKey,
        fragment: &str,
        timestamp: i64,
    ) -> Result<PendingMessage> {
        let key = key.clone();
        let fragment = fragment.trim().to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let updated = tx.execute(
                r#"
UPDATE pending_messages
   SET text = CASE
                WHEN text = '' THEN ?3
                WHEN ?3 = '' THEN text
                ELSE text || ' ' || ?3
              END,
       last_update = MAX(last_update + 1, ?4)
 WHERE tenant_id = ?1
   AND sender_id = ?2
"#,
                params![
                    key.tenant_id.as_str(),
                    key.sender_id.as_str(),
                    fragment,
                    timestamp
                ],
            )?;
            if updated == 0 {
                return Err(BurstError::not_found(&key.tenant_id, &key.sender_id));
            }
            let row = read_row(&tx, &key)?
                .ok_or_else(|| BurstError::not_found(&key.tenant_id, &key.sender_id))?;
            tx.commit()?;
            Ok(row)
        })
        .await
    }

    async fn set_trigger(
        &self,
        key: &PendingKey,
        expected_last_update: i64,
        trigger_id: &TriggerId,
    ) -> Result<bool> {
        let key = key.clone();
        let trigger_id = trigger_id.clone();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                r#"
UPDATE pending_messages
   SET pending_trigger_id = ?3
 WHERE tenant_id = ?1
   AND sender_id = ?2
   AND last_update = ?4
"#,
                params![
                    key.tenant_id.as_str(),
                    key.sender_id.as_str(),
                    trigger_id.as_str(),
                    expected_last_update
                ],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    async fn delete_if_current(
        &self,
        key: &PendingKey,
        expected_last_update: i64,
    ) -> Result<bool> {
        let key = key.clone();
        self.with_conn(move |conn| {
            let deleted = conn.execute(
                r#"
DELETE FROM pending_messages
 WHERE tenant_id = ?1
   AND sender_id = ?2
   AND last_update = ?3
"#,
                params![
                    key.tenant_id.as_str(),
                    key.sender_id.as_str(),
                    expected_last_update
                ],
            )?;
            Ok(deleted > 0)
        })
        .await
    }
}
