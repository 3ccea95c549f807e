use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::scheduler::TriggerHandler;
use crate::store::PendingMessageStore;
use crate::types::{PendingKey, TriggerPayload};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GateOutcome {
    /// The payload's version is no longer stored; nothing was sent or mutated.
    Stale,
    Dispatched { deleted: bool },
}

/// Runs when a delayed trigger fires. Only the trigger carrying the stored
/// `last_update` may dispatch, so cancellation is never load-bearing.
pub struct ConsistencyGate {
    store: Arc<dyn PendingMessageStore>,
    dispatcher: Dispatcher,
}

impl ConsistencyGate {
    pub fn new(store: Arc<dyn PendingMessageStore>, dispatcher: Dispatcher) -> Self {
        Self { store, dispatcher }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(
            tenant_id = %payload.tenant_id,
            sender_id = %payload.sender_id,
            last_update = payload.last_update
        )
    )]
    pub async fn check(&self, payload: &TriggerPayload) -> Result<GateOutcome> {
        let key = PendingKey::new(payload.tenant_id.clone(), payload.sender_id.clone());
        let current = match self.store.get(&key).await? {
            Some(current) if current.last_update == payload.last_update => current,
            Some(current) => {
                tracing::info!(
                    stored_last_update = current.last_update,
                    "stale trigger; a newer fragment owns the burst"
                );
                return Ok(GateOutcome::Stale);
            }
            None => {
                tracing::info!("stale trigger; burst already dispatched");
                return Ok(GateOutcome::Stale);
            }
        };

        let deleted = self.dispatcher.dispatch(&current, payload.last_update).await?;
        Ok(GateOutcome::Dispatched { deleted })
    }
}

#[async_trait]
impl TriggerHandler for ConsistencyGate {
    async fn on_trigger(&self, payload: TriggerPayload) -> Result<GateOutcome> {
        self.check(&payload).await
    }
}
