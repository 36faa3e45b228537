//! SAML service-provider plugin.
//!
//! Service Provider role only: the plugin issues AuthnRequests over
//! the HTTP-Redirect binding, correlates the asynchronous callback
//! through the shared state store, and validates the returned
//! assertion (signature, validity window, audience, one-time
//! `InResponseTo` consumption). It never acts as an Identity
//! Provider, and SAML sessions are never refreshed — the IdP owns
//! them, so re-authentication restarts the redirect flow.
//!
//! Request-correlation entries live in the state store under the
//! `saml:request:` prefix with a bounded TTL; expired entries are
//! reclaimed by the store's sweep, independent of request handling.

pub mod config;
pub mod metadata;
pub mod request;
pub mod response;
pub mod signature;
pub mod xmlenc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use castellan_core::{
    AuthCallbackParams, AuthError, AuthEvent, AuthFailureKind, AuthPlugin, AuthRequirements,
    AuthResult, AuthStartResult, CandidateCredentials, Credentials, FlowKind, PluginResult,
    ProtocolKind, SharedServices, ValidationResult,
};
use castellan_state::StateKind;

pub use config::SamlConfig;

/// Resolved IdP endpoints for the active configuration.
#[derive(Debug, Clone)]
struct ActiveConfig {
    config: SamlConfig,
    sso_url: String,
    certificates: Vec<String>,
}

/// The SAML protocol plugin (SP role).
pub struct SamlPlugin {
    services: RwLock<Option<SharedServices>>,
    active: RwLock<Option<ActiveConfig>>,
}

impl Default for SamlPlugin {
    fn default() -> Self {
        Self::new()
    }
}

fn state_key(request_id: &str) -> String {
    format!("saml:request:{request_id}")
}

impl SamlPlugin {
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: RwLock::new(None),
            active: RwLock::new(None),
        }
    }

    async fn services(&self) -> PluginResult<SharedServices> {
        self.services
            .read()
            .await
            .clone()
            .ok_or_else(|| AuthError::Configuration("plugin is not initialized".to_string()))
    }

    /// Resolve the IdP's SSO endpoint and signing certificates from
    /// whichever description the config carries.
    async fn resolve_idp(&self, config: &SamlConfig) -> PluginResult<ActiveConfig> {
        let mut certificates: Vec<String> = config
            .idp_certificate
            .iter()
            .chain(config.idp_certificates.iter())
            .cloned()
            .collect();
        let mut sso_url = config.idp_sso_url.clone();

        let metadata_xml = if let Some(xml) = &config.idp_metadata_xml {
            Some(xml.clone())
        } else if let Some(url) = &config.idp_metadata_url {
            let body = reqwest::get(url)
                .await
                .map_err(|e| AuthError::Internal(format!("failed to fetch IdP metadata: {e}")))?
                .text()
                .await
                .map_err(|e| AuthError::Internal(format!("failed to read IdP metadata: {e}")))?;
            Some(body)
        } else {
            None
        };

        if let Some(xml) = metadata_xml {
            let endpoints = metadata::parse_idp_metadata(&xml)
                .map_err(|e| AuthError::Configuration(format!("invalid IdP metadata: {e}")))?;
            if sso_url.is_none() {
                sso_url = endpoints.sso_url;
            }
            certificates.extend(endpoints.certificates);
        }

        let sso_url = sso_url.ok_or_else(|| {
            AuthError::Configuration("IdP metadata carries no SSO endpoint".to_string())
        })?;
        if certificates.is_empty() {
            return Err(AuthError::Configuration(
                "no IdP signing certificate available".to_string(),
            ));
        }

        Ok(ActiveConfig {
            config: config.clone(),
            sso_url,
            certificates,
        })
    }

    async fn publish_outcome(&self, subject: Option<String>, success: bool) {
        if let Some(services) = self.services.read().await.as_ref() {
            services.events.publish(AuthEvent {
                plugin_id: "saml".to_string(),
                protocol: ProtocolKind::Saml,
                subject,
                success,
                at: Utc::now(),
            });
        }
    }

    /// SP metadata for IdP administrators; a pure data transform.
    pub fn sp_metadata(config: &SamlConfig, signing_certificate: Option<&str>) -> String {
        metadata::generate_sp_metadata(config, signing_certificate)
    }

    /// Run the post-signature validation pipeline and extract
    /// credentials. Returns a structured failure, never an error,
    /// for anything the response itself got wrong.
    async fn validate_and_extract(
        &self,
        xml: &str,
        active: &ActiveConfig,
        params: &AuthCallbackParams,
    ) -> PluginResult<AuthResult> {
        let parsed = match response::parse_response(xml) {
            Ok(parsed) => parsed,
            Err(e) => {
                return Ok(AuthResult::failure(
                    AuthFailureKind::ValidationFailed,
                    format!("malformed SAML response: {e}"),
                ));
            }
        };

        if let Err(e) = response::validate_status(&parsed) {
            return Ok(AuthResult::failure(AuthFailureKind::ValidationFailed, e));
        }

        let Some(assertion) = parsed.assertion.clone() else {
            return Ok(AuthResult::failure(
                AuthFailureKind::ValidationFailed,
                "response carries no assertion",
            ));
        };

        let skew = active.config.clock_skew_seconds();
        if let Err(e) = response::validate_conditions(&assertion, Utc::now(), skew) {
            return Ok(AuthResult::failure(AuthFailureKind::ValidationFailed, e));
        }
        if let Err(e) = response::validate_audience(&assertion, &active.config.sp_entity_id) {
            return Ok(AuthResult::failure(AuthFailureKind::ValidationFailed, e));
        }

        // Correlate and consume: the entry is removed on success, so
        // presenting the same response twice fails here even though
        // its signature is still valid.
        let Some(request_id) = response::correlation_id(&parsed) else {
            return Ok(AuthResult::failure(
                AuthFailureKind::CorrelationFailed,
                "response carries no InResponseTo",
            ));
        };
        let services = self.services().await?;
        let key = state_key(&request_id);
        let Some(entry) = services.state.get_state(&key).await? else {
            return Ok(AuthResult::failure(
                AuthFailureKind::CorrelationFailed,
                "no live authentication request matches this response",
            ));
        };

        if let Some(sent_relay) = params.params.get("RelayState") {
            let stored_relay = entry.payload.get("relay_state").and_then(|v| v.as_str());
            if stored_relay.is_some_and(|stored| stored != sent_relay) {
                return Ok(AuthResult::failure(
                    AuthFailureKind::CorrelationFailed,
                    "relay state does not match the issued request",
                ));
            }
        }

        services.state.delete_state(&key).await?;

        let mut claims = serde_json::Map::new();
        if let Some(name_id) = &assertion.name_id {
            claims.insert(
                "name_id".to_string(),
                serde_json::Value::String(name_id.clone()),
            );
        }
        if let Some(format) = &assertion.name_id_format {
            claims.insert(
                "name_id_format".to_string(),
                serde_json::Value::String(format.clone()),
            );
        }
        if let Some(session_index) = &assertion.session_index {
            claims.insert(
                "session_index".to_string(),
                serde_json::Value::String(session_index.clone()),
            );
        }

        let mut attributes = serde_json::Map::new();
        for (name, values) in &assertion.attributes {
            let claim = active.config.claim_name(name).to_string();
            let value = if values.len() == 1 {
                serde_json::Value::String(values[0].clone())
            } else {
                serde_json::Value::Array(
                    values
                        .iter()
                        .map(|v| serde_json::Value::String(v.clone()))
                        .collect(),
                )
            };
            attributes.insert(claim, value);
        }
        claims.insert(
            "attributes".to_string(),
            serde_json::Value::Object(attributes),
        );

        let expires_at = assertion
            .session_not_on_or_after
            .or(assertion.not_on_or_after);
        if let Some(expiry) = expires_at {
            claims.insert(
                "expires_at".to_string(),
                serde_json::Value::String(expiry.to_rfc3339()),
            );
        }

        self.publish_outcome(assertion.name_id.clone(), true).await;
        Ok(AuthResult::success(Credentials { claims }, expires_at))
    }
}

#[async_trait]
impl AuthPlugin for SamlPlugin {
    fn id(&self) -> &str {
        "saml"
    }

    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Saml
    }

    fn flow_kind(&self) -> FlowKind {
        FlowKind::Redirect
    }

    async fn initialize(&self, services: SharedServices) -> PluginResult<()> {
        *self.services.write().await = Some(services);
        Ok(())
    }

    async fn shutdown(&self) -> PluginResult<()> {
        *self.active.write().await = None;
        Ok(())
    }

    /// Probe for SAML metadata at the endpoint. Transport failures
    /// are swallowed.
    async fn detect_requirements(&self, endpoint: &str) -> Option<AuthRequirements> {
        let body = reqwest::get(endpoint).await.ok()?.text().await.ok()?;
        if body.contains("urn:oasis:names:tc:SAML:2.0:metadata")
            || body.contains("IDPSSODescriptor")
        {
            let mut metadata = serde_json::Map::new();
            metadata.insert(
                "metadata_url".to_string(),
                serde_json::Value::String(endpoint.to_string()),
            );
            return Some(AuthRequirements {
                protocol: ProtocolKind::Saml,
                metadata,
            });
        }
        None
    }

    /// Issue an AuthnRequest: persist the correlation entry, then
    /// hand back the redirect URL and request id.
    async fn start_auth(&self, config: &serde_json::Value) -> PluginResult<AuthStartResult> {
        let parsed: SamlConfig = serde_json::from_value(config.clone())
            .map_err(|e| AuthError::Configuration(format!("invalid SAML config: {e}")))?;
        let validation = parsed.validate();
        if !validation.valid {
            return Err(AuthError::Configuration(validation.errors.join("; ")));
        }

        let active = self.resolve_idp(&parsed).await?;

        let services = self.services().await?;
        if !services
            .is_permitted(ProtocolKind::Saml, &active.sso_url)
            .await
        {
            return Err(AuthError::Configuration(format!(
                "identity provider is not permitted: {}",
                active.sso_url
            )));
        }

        // xs:ID must not start with a digit.
        let request_id = format!("_{}", Uuid::new_v4());
        let relay_state = Uuid::new_v4().to_string();

        services
            .state
            .set_state(
                &state_key(&request_id),
                serde_json::json!({
                    "request_id": request_id,
                    "relay_state": relay_state,
                    "sp_entity_id": active.config.sp_entity_id,
                    "connection_id": active.config.connection_id,
                }),
                StateKind::SamlRequest,
                active.config.request_ttl_seconds(),
            )
            .await?;

        let authn_request =
            request::build_authn_request(&active.config, &request_id, &active.sso_url);
        let encoded = request::deflate_and_encode(&authn_request)
            .map_err(AuthError::Internal)?;
        let redirect_url = request::build_redirect_url(&active.sso_url, &encoded, &relay_state);

        tracing::info!(
            request_id = %request_id,
            sso_url = %active.sso_url,
            "SAML AuthnRequest issued"
        );

        *self.active.write().await = Some(active);

        Ok(AuthStartResult::Redirect {
            redirect_url,
            correlation_id: request_id,
        })
    }

    /// Validate the IdP's response and extract credentials.
    async fn complete_auth(&self, params: AuthCallbackParams) -> PluginResult<AuthResult> {
        let active = {
            let guard = self.active.read().await;
            guard.clone().ok_or_else(|| {
                AuthError::Configuration(
                    "no active SAML configuration; start_auth first".to_string(),
                )
            })?
        };

        let Some(response_b64) = params
            .params
            .get("SAMLResponse")
            .cloned()
            .or_else(|| params.body.clone())
        else {
            return Ok(AuthResult::failure(
                AuthFailureKind::MissingResponse,
                "callback carries no SAMLResponse",
            ));
        };

        let decoded = match BASE64.decode(response_b64.replace(['\n', '\r', ' '], "")) {
            Ok(decoded) => decoded,
            Err(e) => {
                return Ok(AuthResult::failure(
                    AuthFailureKind::ValidationFailed,
                    format!("response is not valid base64: {e}"),
                ));
            }
        };
        let xml = match String::from_utf8(decoded) {
            Ok(xml) => xml,
            Err(e) => {
                return Ok(AuthResult::failure(
                    AuthFailureKind::ValidationFailed,
                    format!("response is not valid UTF-8: {e}"),
                ));
            }
        };

        // Signature first: nothing downstream is trusted until the
        // document verifies against the IdP's certificate(s).
        if let Err(e) = signature::verify_enveloped_signature(&xml, &active.certificates) {
            self.publish_outcome(None, false).await;
            return Ok(AuthResult::failure(
                AuthFailureKind::ValidationFailed,
                format!("SAML response validation failed: {e}"),
            ));
        }

        let xml = if xmlenc::has_encrypted_assertion(&xml) {
            let Some(key_pem) = &active.config.decryption_key else {
                return Ok(AuthResult::failure(
                    AuthFailureKind::ValidationFailed,
                    "response carries an encrypted assertion but no decryption key is configured",
                ));
            };
            match xmlenc::splice_decrypted(&xml, key_pem) {
                Ok(spliced) => spliced,
                Err(e) => {
                    return Ok(AuthResult::failure(
                        AuthFailureKind::ValidationFailed,
                        format!("assertion decryption failed: {e}"),
                    ));
                }
            }
        } else {
            xml
        };

        let result = self.validate_and_extract(&xml, &active, &params).await?;
        if !result.success {
            self.publish_outcome(None, false).await;
        }
        Ok(result)
    }

    /// Claims-shaped validation: the credentials must name a subject
    /// and must not be past their expiry.
    async fn validate_credentials(
        &self,
        candidate: &CandidateCredentials,
    ) -> PluginResult<ValidationResult> {
        let mut errors = Vec::new();

        if !candidate
            .claims
            .get("name_id")
            .is_some_and(|v| v.as_str().is_some_and(|s| !s.is_empty()))
        {
            errors.push("credentials carry no name_id".to_string());
        }

        if let Some(expiry) = candidate
            .claims
            .get("expires_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        {
            if Utc::now() >= expiry.with_timezone(&Utc) {
                errors.push("credentials have expired".to_string());
            }
        }

        if errors.is_empty() {
            Ok(ValidationResult::ok())
        } else {
            Ok(ValidationResult::failed(errors))
        }
    }

    fn token_expiration(&self, credentials: &Credentials) -> Option<DateTime<Utc>> {
        credentials
            .claim("expires_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    fn validate_config(&self, config: &serde_json::Value) -> ValidationResult {
        match serde_json::from_value::<SamlConfig>(config.clone()) {
            Ok(parsed) => parsed.validate(),
            Err(e) => ValidationResult::failed_with(format!("invalid SAML config: {e}")),
        }
    }
}
