use crate::error::Result;
use crate::types::{SenderId, TenantId};
use async_trait::async_trait;

/// Downstream consumer of a closed burst. Failures surface as `NotifierFailure`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, tenant_id: &TenantId, sender_id: &SenderId, text: &str) -> Result<()>;
}
