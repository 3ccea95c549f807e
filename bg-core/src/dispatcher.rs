use crate::error::{BurstError, Result};
use crate::notifier::Notifier;
use crate::store::PendingMessageStore;
use crate::types::PendingMessage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Wait for the notifier; a failure keeps the row for a later retry.
    #[default]
    Awaited,
    /// Fire the notifier in the background and clean up immediately.
    Detached,
}

/// Hands a confirmed-current burst to the notifier, then removes the row if
/// it is still at the version that was confirmed.
pub struct Dispatcher {
    store: Arc<dyn PendingMessageStore>,
    notifier: Arc<dyn Notifier>,
    mode: DispatchMode,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn PendingMessageStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            mode: DispatchMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: DispatchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Returns whether the row was deleted. `false` means a newer fragment
    /// landed between the gate's read and the delete; the text was still sent.
    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(
            tenant_id = %message.tenant_id,
            sender_id = %message.sender_id,
            last_update = expected_last_update,
            mode = ?self.mode
        )
    )]
    pub async fn dispatch(
        &self,
        message: &PendingMessage,
        expected_last_update: i64,
    ) -> Result<bool> {
        match self.mode {
            DispatchMode::Awaited => {
                if let Err(e) = self
                    .notifier
                    .send(&message.tenant_id, &message.sender_id, &message.text)
                    .await
                {
                    tracing::warn!(error = %e, "notifier failed; pending row kept");
                    return Err(match e {
                        BurstError::NotifierFailure(_) => e,
                        other => BurstError::NotifierFailure(other.to_string()),
                    });
                }
            }
            DispatchMode::Detached => {
                let notifier = self.notifier.clone();
                let message = message.clone();
                tokio::spawn(async move {
                    if let Err(e) = notifier
                        .send(&message.tenant_id, &message.sender_id, &message.text)
                        .await
                    {
                        tracing::error!(
                            tenant_id = %message.tenant_id,
                            sender_id = %message.sender_id,
                            error = %e,
                            "detached notifier send failed"
                        );
                    }
                });
            }
        }

        let deleted = self
            .store
            .delete_if_current(&message.key(), expected_last_update)
            .await?;
        if deleted {
            tracing::info!(chars = message.text.chars().count(), "burst dispatched");
        } else {
            tracing::warn!("burst dispatched but a newer fragment arrived; row left to the newer trigger");
        }
        Ok(deleted)
    }
}
