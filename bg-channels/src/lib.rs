//! Chat-provider plumbing around the debounce core.
//!
//! Inbound: provider webhook payloads are reduced to an [`InboundEnvelope`]
//! and then to the plain text fragment the coordinator ingests.
//! Outbound: [`Notifier`](bg_core::Notifier) implementations that hand a
//! finished burst to the next stage.

mod evolution;
mod normalize;
mod notifier;
mod source;
mod types;
mod whatsapp_cloud;
mod zapi;

pub use normalize::{normalize, resolve_text};
pub use notifier::{HttpNotifier, LogNotifier};
pub use source::MessageSource;
pub use types::{InboundContent, InboundEnvelope};
