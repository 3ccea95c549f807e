use thiserror::Error;

pub type Result<T> = std::result::Result<T, BurstError>;

#[derive(Debug, Error)]
pub enum BurstError {
    /// Row vanished while a mutation expected it (dispatcher deleted it).
    #[error("pending message not found for tenant={tenant_id} sender={sender_id}")]
    NotFound {
        tenant_id: String,
        sender_id: String,
    },

    /// Another ingest created the row first.
    #[error("pending message already exists for tenant={tenant_id} sender={sender_id}")]
    AlreadyExists {
        tenant_id: String,
        sender_id: String,
    },

    /// Both fallback paths lost their race; the transport should redeliver.
    #[error("concurrent ingest contention for tenant={tenant_id} sender={sender_id}")]
    Contention {
        tenant_id: String,
        sender_id: String,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error("notifier failure: {0}")]
    NotifierFailure(String),
}

impl BurstError {
    pub(crate) fn not_found(tenant_id: &str, sender_id: &str) -> Self {
        Self::NotFound {
            tenant_id: tenant_id.to_string(),
            sender_id: sender_id.to_string(),
        }
    }

    pub(crate) fn already_exists(tenant_id: &str, sender_id: &str) -> Self {
        Self::AlreadyExists {
            tenant_id: tenant_id.to_string(),
            sender_id: sender_id.to_string(),
        }
    }

    pub(crate) fn contention(tenant_id: &str, sender_id: &str) -> Self {
        Self::Contention {
            tenant_id: tenant_id.to_string(),
            sender_id: sender_id.to_string(),
        }
    }

    /// Store and scheduler outages may be redelivered by the trigger source.
    /// A notifier failure keeps the row and is never retried automatically.
    pub fn is_redeliverable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::SchedulerUnavailable(_)
        )
    }
}

impl From<rusqlite::Error> for BurstError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StoreUnavailable(e.to_string())
    }
}

impl From<tokio::task::JoinError> for BurstError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::StoreUnavailable(format!("store task failed: {e}"))
    }
}
