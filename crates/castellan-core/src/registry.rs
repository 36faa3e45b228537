//! Plugin registration, detection, and teardown.

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{AuthError, PluginResult};
use crate::plugin::AuthPlugin;
use crate::services::SharedServices;
use crate::types::AuthRequirements;

/// Owns the registered plugins.
///
/// Plugins are kept in registration order: `detect_auth_type` walks
/// them in that order and returns the first hit, so detection is
/// deterministic rather than priority-ranked.
pub struct PluginRegistry {
    services: SharedServices,
    plugins: RwLock<Vec<Arc<dyn AuthPlugin>>>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new(services: SharedServices) -> Self {
        Self {
            services,
            plugins: RwLock::new(Vec::new()),
        }
    }

    /// Register a plugin, calling its `initialize` exactly once.
    pub async fn register(&self, plugin: Arc<dyn AuthPlugin>) -> PluginResult<()> {
        {
            let plugins = self.plugins.read().await;
            if plugins.iter().any(|p| p.id() == plugin.id()) {
                return Err(AuthError::DuplicatePlugin(plugin.id().to_string()));
            }
        }

        plugin.initialize(self.services.clone()).await?;

        let mut plugins = self.plugins.write().await;
        // Re-check under the write lock: a concurrent register may
        // have won the race after the read check.
        if plugins.iter().any(|p| p.id() == plugin.id()) {
            return Err(AuthError::DuplicatePlugin(plugin.id().to_string()));
        }
        tracing::info!(plugin = plugin.id(), protocol = plugin.protocol().as_str(), "Plugin registered");
        plugins.push(plugin);
        Ok(())
    }

    /// Unregister a plugin by id.
    ///
    /// The plugin's `shutdown` is invoked first; a shutdown error is
    /// logged and the entry is removed regardless.
    pub async fn unregister(&self, id: &str) -> PluginResult<()> {
        let mut plugins = self.plugins.write().await;
        let position = plugins
            .iter()
            .position(|p| p.id() == id)
            .ok_or_else(|| AuthError::PluginNotFound(id.to_string()))?;
        let plugin = plugins.remove(position);
        drop(plugins);

        if let Err(e) = plugin.shutdown().await {
            tracing::warn!(plugin = id, error = %e, "Plugin shutdown reported an error");
        }
        tracing::info!(plugin = id, "Plugin unregistered");
        Ok(())
    }

    /// Ids of registered plugins in registration order.
    pub async fn plugin_ids(&self) -> Vec<String> {
        let plugins = self.plugins.read().await;
        plugins.iter().map(|p| p.id().to_string()).collect()
    }

    /// Look up a plugin by id.
    pub async fn get(&self, id: &str) -> Option<Arc<dyn AuthPlugin>> {
        let plugins = self.plugins.read().await;
        plugins.iter().find(|p| p.id() == id).cloned()
    }

    /// Probe an endpoint with each plugin in registration order and
    /// return the first non-null detection.
    pub async fn detect_auth_type(&self, endpoint: &str) -> Option<AuthRequirements> {
        let plugins = {
            let guard = self.plugins.read().await;
            guard.clone()
        };
        for plugin in plugins {
            if let Some(requirements) = plugin.detect_requirements(endpoint).await {
                tracing::debug!(
                    plugin = plugin.id(),
                    protocol = requirements.protocol.as_str(),
                    "Detected authentication requirements"
                );
                return Some(requirements);
            }
        }
        None
    }

    /// Tear down all plugins concurrently, collecting every outcome
    /// instead of short-circuiting on the first failure.
    pub async fn shutdown(&self) -> Vec<(String, PluginResult<()>)> {
        let plugins = {
            let mut guard = self.plugins.write().await;
            std::mem::take(&mut *guard)
        };

        let shutdowns = plugins.iter().map(|p| {
            let plugin = Arc::clone(p);
            async move { (plugin.id().to_string(), plugin.shutdown().await) }
        });
        let outcomes = futures::future::join_all(shutdowns).await;

        for (id, outcome) in &outcomes {
            match outcome {
                Ok(()) => tracing::debug!(plugin = %id, "Plugin shut down"),
                Err(e) => tracing::warn!(plugin = %id, error = %e, "Plugin shutdown failed"),
            }
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AuthStartResult, CandidateCredentials, FlowKind, ProtocolKind, ValidationResult,
    };
    use async_trait::async_trait;
    use castellan_secrets::{SecretManager, StaticSecretBackend};
    use castellan_state::MemoryStateStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn services() -> SharedServices {
        SharedServices::new(
            Arc::new(SecretManager::new(Arc::new(StaticSecretBackend::default()))),
            Arc::new(MemoryStateStore::new()),
        )
    }

    struct FakePlugin {
        id: String,
        detects: bool,
        initialized: AtomicUsize,
        fail_shutdown: bool,
    }

    impl FakePlugin {
        fn new(id: &str, detects: bool) -> Self {
            Self {
                id: id.to_string(),
                detects,
                initialized: AtomicUsize::new(0),
                fail_shutdown: false,
            }
        }

        fn failing_shutdown(id: &str) -> Self {
            Self {
                fail_shutdown: true,
                ..Self::new(id, false)
            }
        }
    }

    #[async_trait]
    impl AuthPlugin for FakePlugin {
        fn id(&self) -> &str {
            &self.id
        }

        fn protocol(&self) -> ProtocolKind {
            ProtocolKind::Webhook
        }

        fn flow_kind(&self) -> FlowKind {
            FlowKind::NonInteractive
        }

        async fn initialize(&self, _services: SharedServices) -> PluginResult<()> {
            self.initialized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn shutdown(&self) -> PluginResult<()> {
            if self.fail_shutdown {
                return Err(AuthError::Internal("shutdown failed".to_string()));
            }
            Ok(())
        }

        async fn detect_requirements(&self, _endpoint: &str) -> Option<AuthRequirements> {
            self.detects.then(|| AuthRequirements {
                protocol: ProtocolKind::Webhook,
                metadata: serde_json::Map::from_iter([(
                    "detected_by".to_string(),
                    serde_json::Value::String(self.id.clone()),
                )]),
            })
        }

        async fn start_auth(&self, _config: &serde_json::Value) -> PluginResult<AuthStartResult> {
            Ok(AuthStartResult::Completed)
        }

        async fn validate_credentials(
            &self,
            _candidate: &CandidateCredentials,
        ) -> PluginResult<ValidationResult> {
            Ok(ValidationResult::ok())
        }

        fn validate_config(&self, _config: &serde_json::Value) -> ValidationResult {
            ValidationResult::ok()
        }
    }

    #[tokio::test]
    async fn test_register_initializes_exactly_once() {
        let registry = PluginRegistry::new(services());
        let plugin = Arc::new(FakePlugin::new("webhook", false));
        registry.register(plugin.clone()).await.unwrap();
        assert_eq!(plugin.initialized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = PluginRegistry::new(services());
        registry
            .register(Arc::new(FakePlugin::new("webhook", false)))
            .await
            .unwrap();
        let result = registry
            .register(Arc::new(FakePlugin::new("webhook", false)))
            .await;
        assert!(matches!(result, Err(AuthError::DuplicatePlugin(_))));
        assert_eq!(registry.plugin_ids().await, vec!["webhook"]);
    }

    #[tokio::test]
    async fn test_detection_returns_first_by_registration_order() {
        let registry = PluginRegistry::new(services());
        registry
            .register(Arc::new(FakePlugin::new("first", true)))
            .await
            .unwrap();
        registry
            .register(Arc::new(FakePlugin::new("second", true)))
            .await
            .unwrap();

        let requirements = registry
            .detect_auth_type("https://api.example.com")
            .await
            .unwrap();
        assert_eq!(
            requirements.metadata.get("detected_by").unwrap(),
            &serde_json::Value::String("first".to_string())
        );
    }

    #[tokio::test]
    async fn test_detection_skips_non_matching_plugins() {
        let registry = PluginRegistry::new(services());
        registry
            .register(Arc::new(FakePlugin::new("miss", false)))
            .await
            .unwrap();
        registry
            .register(Arc::new(FakePlugin::new("hit", true)))
            .await
            .unwrap();

        let requirements = registry
            .detect_auth_type("https://api.example.com")
            .await
            .unwrap();
        assert_eq!(
            requirements.metadata.get("detected_by").unwrap(),
            &serde_json::Value::String("hit".to_string())
        );
    }

    #[tokio::test]
    async fn test_detection_none_when_no_plugin_matches() {
        let registry = PluginRegistry::new(services());
        registry
            .register(Arc::new(FakePlugin::new("miss", false)))
            .await
            .unwrap();
        assert!(registry
            .detect_auth_type("https://api.example.com")
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_unregister_removes_even_when_shutdown_fails() {
        let registry = PluginRegistry::new(services());
        registry
            .register(Arc::new(FakePlugin::failing_shutdown("flaky")))
            .await
            .unwrap();

        registry.unregister("flaky").await.unwrap();
        assert!(registry.plugin_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_unknown_id_errors() {
        let registry = PluginRegistry::new(services());
        let result = registry.unregister("ghost").await;
        assert!(matches!(result, Err(AuthError::PluginNotFound(_))));
    }

    #[tokio::test]
    async fn test_shutdown_collects_all_outcomes() {
        let registry = PluginRegistry::new(services());
        registry
            .register(Arc::new(FakePlugin::new("ok", false)))
            .await
            .unwrap();
        registry
            .register(Arc::new(FakePlugin::failing_shutdown("bad")))
            .await
            .unwrap();

        let outcomes = registry.shutdown().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().any(|(id, r)| id == "ok" && r.is_ok()));
        assert!(outcomes.iter().any(|(id, r)| id == "bad" && r.is_err()));
        assert!(registry.plugin_ids().await.is_empty());
    }
}
