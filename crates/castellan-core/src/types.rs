//! Shared data model for the plugin contract.
//!
//! Nothing in this module ever carries a raw secret value: plugin
//! configs hold references, `Credentials` holds derived claims, and
//! validation outcomes hold reasons.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity protocol a plugin implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolKind {
    Webhook,
    Saml,
    Oauth2,
}

impl ProtocolKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Saml => "saml",
            Self::Oauth2 => "oauth2",
        }
    }
}

/// Shape of a plugin's authentication flow.
///
/// Callers branch on this tag to decide how to drive a flow; they
/// never special-case a particular plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    /// Completes immediately, no callback (webhook verification).
    NonInteractive,
    /// Redirects to an identity source and completes on callback
    /// (SAML, OAuth2).
    Redirect,
    /// Issues a challenge and validates the response.
    ChallengeResponse,
}

/// What a probed endpoint appears to require.
///
/// Produced by detection; carries no identity and no secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequirements {
    pub protocol: ProtocolKind,
    /// Free-form detection metadata (header names seen, provider
    /// hints, metadata URLs).
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Outcome of starting a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuthStartResult {
    /// Non-interactive protocols are ready as soon as their config
    /// validates.
    Completed,
    /// Redirect protocols hand back the URL to send the user to and
    /// the id that correlates the eventual callback.
    Redirect {
        redirect_url: String,
        correlation_id: String,
    },
}

/// Raw data returned by the identity source at the end of a redirect
/// flow. Opaque to the registry; parsed only by the owning plugin.
#[derive(Debug, Clone, Default)]
pub struct AuthCallbackParams {
    /// Query or form parameters from the callback request.
    pub params: HashMap<String, String>,
    /// Raw body, when the binding posts one.
    pub body: Option<String>,
}

/// Protocol-specific claims derived from a completed flow.
///
/// Holds what the protocol asserted about the subject — never the
/// raw secrets used to derive it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl Credentials {
    #[must_use]
    pub fn claim(&self, name: &str) -> Option<&serde_json::Value> {
        self.claims.get(name)
    }
}

/// Candidate material handed to `validate_credentials`.
///
/// Protocol-specific: the webhook plugin reads `headers` and `body`,
/// token-based plugins read `claims`.
#[derive(Debug, Clone, Default)]
pub struct CandidateCredentials {
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    pub claims: serde_json::Map<String, serde_json::Value>,
}

impl CandidateCredentials {
    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Why a lifecycle method could not produce credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFailureKind {
    /// The protocol cannot structurally support this operation.
    UnsupportedOperation,
    /// The protocol has no refresh concept; re-authentication must
    /// restart the flow.
    NoRefresh,
    /// A signature, timestamp, replay, or assertion check failed.
    ValidationFailed,
    /// The callback carried no response payload.
    MissingResponse,
    /// The callback did not correlate to a live started flow.
    CorrelationFailed,
}

/// Structured failure carried inside an `AuthResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthFailure {
    pub kind: AuthFailureKind,
    pub message: String,
}

/// Outcome of `complete_auth` / `refresh_auth`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuthFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthResult {
    #[must_use]
    pub fn success(credentials: Credentials, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            success: true,
            credentials: Some(credentials),
            error: None,
            expires_at,
        }
    }

    #[must_use]
    pub fn failure(kind: AuthFailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            credentials: None,
            error: Some(AuthFailure {
                kind,
                message: message.into(),
            }),
            expires_at: None,
        }
    }

    /// Standard result for protocols without a callback step.
    #[must_use]
    pub fn unsupported(operation: &str, protocol: &str) -> Self {
        Self::failure(
            AuthFailureKind::UnsupportedOperation,
            format!("{protocol} does not support {operation}"),
        )
    }

    /// Standard result for protocols without a refresh concept.
    #[must_use]
    pub fn no_refresh(protocol: &str) -> Self {
        Self::failure(
            AuthFailureKind::NoRefresh,
            format!("{protocol} sessions cannot be refreshed; restart the authentication flow"),
        )
    }
}

/// Outcome of a validation operation. Returned, never thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl ValidationResult {
    #[must_use]
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }

    #[must_use]
    pub fn failed_with(error: impl Into<String>) -> Self {
        Self::failed(vec![error.into()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_result_shape() {
        let result = AuthResult::unsupported("complete_auth", "webhook");
        assert!(!result.success);
        let failure = result.error.unwrap();
        assert_eq!(failure.kind, AuthFailureKind::UnsupportedOperation);
        assert!(failure.message.contains("complete_auth"));
    }

    #[test]
    fn test_no_refresh_result_explains_restart() {
        let result = AuthResult::no_refresh("saml");
        let failure = result.error.unwrap();
        assert_eq!(failure.kind, AuthFailureKind::NoRefresh);
        assert!(failure.message.contains("restart"));
    }

    #[test]
    fn test_candidate_header_lookup_is_case_insensitive() {
        let mut candidate = CandidateCredentials::default();
        candidate
            .headers
            .insert("X-Hub-Signature-256".to_string(), "sha256=ab".to_string());
        assert_eq!(candidate.header("x-hub-signature-256"), Some("sha256=ab"));
        assert_eq!(candidate.header("missing"), None);
    }

    #[test]
    fn test_start_result_serialization() {
        let redirect = AuthStartResult::Redirect {
            redirect_url: "https://idp.example.com/sso?SAMLRequest=...".to_string(),
            correlation_id: "_id42".to_string(),
        };
        let encoded = serde_json::to_value(&redirect).unwrap();
        assert_eq!(encoded["status"], "redirect");
        assert_eq!(encoded["correlation_id"], "_id42");

        let completed = serde_json::to_value(AuthStartResult::Completed).unwrap();
        assert_eq!(completed["status"], "completed");
    }

    #[test]
    fn test_validation_result_constructors() {
        assert!(ValidationResult::ok().valid);
        let failed = ValidationResult::failed_with("missing signature header");
        assert!(!failed.valid);
        assert_eq!(failed.errors.len(), 1);
    }
}
