use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(TenantId);
string_id!(SenderId);
string_id!(TriggerId);

/// Composite partition key; tenants never share rows even for identical senders.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PendingKey {
    pub tenant_id: TenantId,
    pub sender_id: SenderId,
}

impl PendingKey {
    pub fn new(tenant_id: impl Into<TenantId>, sender_id: impl Into<SenderId>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            sender_id: sender_id.into(),
        }
    }
}

impl fmt::Display for PendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.sender_id)
    }
}

/// The in-progress burst for one sender. Presence means "not yet dispatched".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub tenant_id: TenantId,
    pub sender_id: SenderId,
    pub text: String,
    /// Unix seconds; doubles as the optimistic version token.
    pub last_update: i64,
    #[serde(default)]
    pub pending_trigger_id: Option<TriggerId>,
}

impl PendingMessage {
    pub fn key(&self) -> PendingKey {
        PendingKey::new(self.tenant_id.clone(), self.sender_id.clone())
    }
}

/// Body of every scheduled job. The gate compares `last_update` against the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPayload {
    pub tenant_id: TenantId,
    pub sender_id: SenderId,
    pub last_update: i64,
}

impl TriggerPayload {
    pub fn for_message(message: &PendingMessage) -> Self {
        Self {
            tenant_id: message.tenant_id.clone(),
            sender_id: message.sender_id.clone(),
            last_update: message.last_update,
        }
    }
}

/// `trim(existing + " " + fragment)`.
pub fn merge_text(existing: &str, fragment: &str) -> String {
    let existing = existing.trim();
    let fragment = fragment.trim();
    match (existing.is_empty(), fragment.is_empty()) {
        (true, _) => fragment.to_string(),
        (false, true) => existing.to_string(),
        (false, false) => format!("{existing} {fragment}"),
    }
}

/// Version for a merge: never below the stored value plus one, even under clock skew.
pub(crate) fn next_version(stored: i64, now: i64) -> i64 {
    now.max(stored.saturating_add(1))
}
