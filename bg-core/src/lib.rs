//! Burst coalescing core.
//!
//! Inbound fragments for one `(tenant_id, sender_id)` are merged into a single
//! pending row. Every merge bumps the row's `last_update` version and schedules
//! a delayed trigger carrying that version; the trigger only dispatches when the
//! version it carries is still the stored one.

mod clock;
mod dispatcher;
mod error;
mod gate;
mod ingest;
mod notifier;
mod scheduler;
mod sqlite_store;
mod store;
mod types;

#[cfg(test)]
mod test_support;

pub use clock::{Clock, SystemClock};
pub use dispatcher::{DispatchMode, Dispatcher};
pub use error::{BurstError, Result};
pub use gate::{ConsistencyGate, GateOutcome};
pub use ingest::{IngestCoordinator, IngestReceipt, IngestRequest};
pub use notifier::Notifier;
pub use scheduler::{
    CancelOutcome, DelayScheduler, TokioDelayScheduler, TriggerHandler, TriggerRetryPolicy,
};
pub use sqlite_store::SqlitePendingStore;
pub use store::{MemoryPendingStore, PendingMessageStore};
pub use types::{PendingKey, PendingMessage, SenderId, TenantId, TriggerId, TriggerPayload, merge_text};
