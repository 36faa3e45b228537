//! The protocol plugin contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::PluginResult;
use crate::services::SharedServices;
use crate::types::{
    AuthCallbackParams, AuthRequirements, AuthResult, AuthStartResult, CandidateCredentials,
    Credentials, FlowKind, ProtocolKind, ValidationResult,
};

/// Lifecycle every protocol plugin implements.
///
/// Methods must be safely callable concurrently for different flows;
/// plugins keep their mutable state behind interior locks. Lifecycle
/// methods a protocol cannot structurally support return structured
/// results (`AuthResult::unsupported`, `AuthResult::no_refresh`)
/// through the provided defaults instead of erroring.
#[async_trait]
pub trait AuthPlugin: Send + Sync {
    /// Stable plugin id; the registry rejects duplicates.
    fn id(&self) -> &str;

    fn protocol(&self) -> ProtocolKind;

    /// The flow shape callers branch on.
    fn flow_kind(&self) -> FlowKind;

    /// Called exactly once when the plugin is registered.
    async fn initialize(&self, services: SharedServices) -> PluginResult<()>;

    /// Called when the plugin is unregistered or the registry shuts
    /// down.
    async fn shutdown(&self) -> PluginResult<()> {
        Ok(())
    }

    /// Probe an endpoint for this plugin's protocol.
    ///
    /// Transport failures are swallowed: a probe that cannot reach
    /// the endpoint returns `None` and never aborts the caller's
    /// iteration over other plugins.
    async fn detect_requirements(&self, _endpoint: &str) -> Option<AuthRequirements> {
        None
    }

    /// Validate config and start a flow.
    async fn start_auth(&self, config: &serde_json::Value) -> PluginResult<AuthStartResult>;

    /// Complete a redirect flow from its callback.
    async fn complete_auth(&self, _params: AuthCallbackParams) -> PluginResult<AuthResult> {
        Ok(AuthResult::unsupported(
            "complete_auth",
            self.protocol().as_str(),
        ))
    }

    /// Refresh previously issued credentials.
    async fn refresh_auth(&self, _credentials: &Credentials) -> PluginResult<AuthResult> {
        Ok(AuthResult::no_refresh(self.protocol().as_str()))
    }

    /// Validate candidate material (a signed request, a token, ...).
    async fn validate_credentials(
        &self,
        candidate: &CandidateCredentials,
    ) -> PluginResult<ValidationResult>;

    /// When the credentials expire, if the protocol knows.
    fn token_expiration(&self, _credentials: &Credentials) -> Option<DateTime<Utc>> {
        None
    }

    /// Check a config document against this plugin's schema without
    /// starting anything.
    fn validate_config(&self, config: &serde_json::Value) -> ValidationResult;
}
