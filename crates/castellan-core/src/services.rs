//! Shared services handed to plugins at registration.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use castellan_secrets::SecretManager;
use castellan_state::StateStore;

use crate::types::ProtocolKind;

/// Governance allow-list, consulted best-effort.
///
/// Not required for verification correctness; a plugin that cannot
/// reach it proceeds and logs.
#[async_trait]
pub trait AllowList: Send + Sync {
    /// Whether an identity source (IdP entity id, webhook origin) is
    /// permitted for the protocol.
    async fn is_permitted(&self, protocol: ProtocolKind, origin: &str) -> bool;
}

/// A verification/authentication outcome worth publishing.
#[derive(Debug, Clone)]
pub struct AuthEvent {
    pub plugin_id: String,
    pub protocol: ProtocolKind,
    /// Identifier of the flow or source; never credential material.
    pub subject: Option<String>,
    pub success: bool,
    pub at: DateTime<Utc>,
}

/// Best-effort audit/event publication.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: AuthEvent);
}

/// Sink that emits events as structured log lines.
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: AuthEvent) {
        tracing::info!(
            plugin = %event.plugin_id,
            protocol = event.protocol.as_str(),
            subject = event.subject.as_deref().unwrap_or("-"),
            success = event.success,
            "Authentication outcome"
        );
    }
}

/// Services every plugin receives in `initialize`.
#[derive(Clone)]
pub struct SharedServices {
    pub secrets: Arc<SecretManager>,
    pub state: Arc<dyn StateStore>,
    /// Optional governance hook; `None` means everything is permitted.
    pub allow_list: Option<Arc<dyn AllowList>>,
    pub events: Arc<dyn EventSink>,
}

impl SharedServices {
    pub fn new(secrets: Arc<SecretManager>, state: Arc<dyn StateStore>) -> Self {
        Self {
            secrets,
            state,
            allow_list: None,
            events: Arc::new(TracingEventSink),
        }
    }

    /// Best-effort permission check; permitted when no allow-list is
    /// wired.
    pub async fn is_permitted(&self, protocol: ProtocolKind, origin: &str) -> bool {
        match &self.allow_list {
            Some(list) => list.is_permitted(protocol, origin).await,
            None => true,
        }
    }
}

impl std::fmt::Debug for SharedServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedServices")
            .field("allow_list", &self.allow_list.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use castellan_secrets::StaticSecretBackend;
    use castellan_state::MemoryStateStore;

    fn services() -> SharedServices {
        SharedServices::new(
            Arc::new(SecretManager::new(Arc::new(StaticSecretBackend::default()))),
            Arc::new(MemoryStateStore::new()),
        )
    }

    #[tokio::test]
    async fn test_no_allow_list_permits_everything() {
        let services = services();
        assert!(
            services
                .is_permitted(ProtocolKind::Saml, "https://idp.example.com")
                .await
        );
    }

    struct DenyAll;

    #[async_trait]
    impl AllowList for DenyAll {
        async fn is_permitted(&self, _protocol: ProtocolKind, _origin: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_allow_list_is_consulted() {
        let mut services = services();
        services.allow_list = Some(Arc::new(DenyAll));
        assert!(
            !services
                .is_permitted(ProtocolKind::Webhook, "https://hooks.example.com")
                .await
        );
    }
}
