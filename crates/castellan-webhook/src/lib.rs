//! Webhook signature-verification plugin.
//!
//! Verification-only: the plugin checks that an inbound message
//! genuinely originates from its claimed source and has not been
//! altered or replayed. It never produces a signature. The flow is
//! non-interactive — `start_auth` validates the configuration and
//! completes immediately; there is no callback and no refresh.

pub mod config;
pub mod presets;
pub mod replay;
pub mod verify;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use castellan_core::{
    AuthError, AuthEvent, AuthPlugin, AuthRequirements, AuthStartResult, CandidateCredentials,
    FlowKind, PluginResult, ProtocolKind, SharedServices, ValidationResult,
};
use castellan_secrets::SecretReference;

pub use config::{PayloadFormat, SignatureEncoding, SignatureScheme, WebhookConfig};
pub use replay::ReplayCache;
pub use verify::{CustomVerifier, GENERIC_FAILURE};

/// The webhook protocol plugin.
pub struct WebhookPlugin {
    services: RwLock<Option<SharedServices>>,
    config: RwLock<Option<WebhookConfig>>,
    replay: RwLock<Option<ReplayCache>>,
    custom: Option<Arc<CustomVerifier>>,
}

impl Default for WebhookPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: RwLock::new(None),
            config: RwLock::new(None),
            replay: RwLock::new(None),
            custom: None,
        }
    }

    /// Attach a verifier for the `custom` scheme.
    #[must_use]
    pub fn with_custom_verifier(
        mut self,
        verifier: impl Fn(&[u8], &str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.custom = Some(Arc::new(verifier));
        self
    }

    /// Resolve configured key strings, fetching `backend:path#key`
    /// references through the secret manager.
    async fn resolve_keys(&self, config: &WebhookConfig) -> PluginResult<Vec<Vec<u8>>> {
        let connection_id = config.connection_id.as_deref().unwrap_or("default");
        let mut keys = Vec::new();
        for raw in config.key_material() {
            if SecretReference::looks_like_reference(raw) {
                let reference: SecretReference = raw.parse()?;
                let services = self.services.read().await;
                let services = services.as_ref().ok_or_else(|| {
                    AuthError::Configuration("plugin is not initialized".to_string())
                })?;
                let value = services.secrets.get_secret(&reference, connection_id).await?;
                keys.push(value.value.clone());
            } else {
                keys.push(raw.as_bytes().to_vec());
            }
        }
        Ok(keys)
    }

    fn overlay_and_validate(config: &WebhookConfig) -> Result<WebhookConfig, Vec<String>> {
        if let Some(name) = config.provider.as_deref() {
            if presets::find(name).is_none() {
                return Err(vec![format!("unknown provider preset: {name}")]);
            }
        }
        let merged = presets::apply_named(config);
        let result = merged.validate();
        if result.valid {
            Ok(merged)
        } else {
            Err(result.errors)
        }
    }

    async fn publish_outcome(&self, success: bool) {
        let services = self.services.read().await;
        if let Some(services) = services.as_ref() {
            services.events.publish(AuthEvent {
                plugin_id: "webhook".to_string(),
                protocol: ProtocolKind::Webhook,
                subject: None,
                success,
                at: chrono::Utc::now(),
            });
        }
    }
}

#[async_trait]
impl AuthPlugin for WebhookPlugin {
    fn id(&self) -> &str {
        "webhook"
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Webhook
    }

    fn flow_kind(&self) -> FlowKind {
        FlowKind::NonInteractive
    }

    async fn initialize(&self, services: SharedServices) -> PluginResult<()> {
        *self.services.write().await = Some(services);
        Ok(())
    }

    async fn shutdown(&self) -> PluginResult<()> {
        *self.config.write().await = None;
        *self.replay.write().await = None;
        Ok(())
    }

    /// Probe for signature-header hints. Transport failures are
    /// swallowed so detection never aborts the registry's iteration.
    async fn detect_requirements(&self, endpoint: &str) -> Option<AuthRequirements> {
        let client = reqwest::Client::builder().build().ok()?;
        let response = client.get(endpoint).send().await.ok()?;

        let allow_headers = response
            .headers()
            .get("access-control-allow-headers")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        for preset in presets::PRESETS {
            let wanted = preset.signature_header;
            if allow_headers.contains(wanted) || response.headers().contains_key(wanted) {
                let mut metadata = serde_json::Map::new();
                metadata.insert(
                    "provider".to_string(),
                    serde_json::Value::String(preset.name.to_string()),
                );
                metadata.insert(
                    "signature_header".to_string(),
                    serde_json::Value::String(wanted.to_string()),
                );
                return Some(AuthRequirements {
                    protocol: ProtocolKind::Webhook,
                    metadata,
                });
            }
        }
        None
    }

    /// Validate and lock in the configuration. Non-interactive:
    /// the result is immediately completed.
    async fn start_auth(&self, config: &serde_json::Value) -> PluginResult<AuthStartResult> {
        let parsed: WebhookConfig = serde_json::from_value(config.clone())
            .map_err(|e| AuthError::Configuration(format!("invalid webhook config: {e}")))?;

        let merged = Self::overlay_and_validate(&parsed)
            .map_err(|errors| AuthError::Configuration(errors.join("; ")))?;

        let replay_ttl = merged
            .replay_ttl_seconds
            .unwrap_or(config::DEFAULT_REPLAY_TTL_SECONDS);
        *self.replay.write().await = merged
            .prevent_replay
            .then(|| ReplayCache::new(replay_ttl));
        *self.config.write().await = Some(merged);

        Ok(AuthStartResult::Completed)
    }

    /// Verify a signed request against the active configuration.
    async fn validate_credentials(
        &self,
        candidate: &CandidateCredentials,
    ) -> PluginResult<ValidationResult> {
        let config = {
            let guard = self.config.read().await;
            guard.clone().ok_or_else(|| {
                AuthError::Configuration(
                    "no active webhook configuration; start_auth first".to_string(),
                )
            })?
        };

        let keys = self.resolve_keys(&config).await?;

        let verified = match verify::verify(
            &config,
            &keys,
            candidate,
            self.custom.as_deref(),
        ) {
            Ok(verified) => verified,
            Err(reason) => {
                self.publish_outcome(false).await;
                return Ok(ValidationResult::failed_with(reason));
            }
        };

        if config.prevent_replay {
            let key = ReplayCache::replay_key(&verified.signature, verified.timestamp);
            let replay = self.replay.read().await;
            let fresh = replay
                .as_ref()
                .is_some_and(|cache| cache.check_and_record(&key));
            if !fresh {
                // Same channel and same reason as a key mismatch: no
                // oracle about which check rejected the request.
                self.publish_outcome(false).await;
                return Ok(ValidationResult::failed_with(GENERIC_FAILURE));
            }
        }

        self.publish_outcome(true).await;
        Ok(ValidationResult::ok())
    }

    fn validate_config(&self, config: &serde_json::Value) -> ValidationResult {
        let parsed: WebhookConfig = match serde_json::from_value(config.clone()) {
            Ok(parsed) => parsed,
            Err(e) => return ValidationResult::failed_with(format!("invalid webhook config: {e}")),
        };
        match Self::overlay_and_validate(&parsed) {
            Ok(_) => ValidationResult::ok(),
            Err(errors) => ValidationResult::failed(errors),
        }
    }
}
