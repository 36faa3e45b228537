//! State entry types.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// What kind of flow data an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// OAuth2 CSRF `state` parameter.
    OauthState,
    /// WebAuthn challenge awaiting its response.
    WebauthnChallenge,
    /// SAML AuthnRequest awaiting its assertion.
    SamlRequest,
    /// Short-lived one-off token.
    TempToken,
}

impl StateKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OauthState => "oauth_state",
            Self::WebauthnChallenge => "webauthn_challenge",
            Self::SamlRequest => "saml_request",
            Self::TempToken => "temp_token",
        }
    }
}

/// A stored correlation entry.
///
/// Lifecycle: created when a flow starts, read until consumed or
/// expired, deleted on consume or by the expiry sweep. Every entry
/// has a finite expiry; there is no unbounded state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateData {
    /// The storage key this entry lives under.
    pub id: String,
    pub kind: StateKind,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StateData {
    /// Create an entry expiring `ttl_seconds` from now.
    #[must_use]
    pub fn new(id: &str, kind: StateKind, payload: serde_json::Value, ttl_seconds: i64) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            kind,
            payload,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds),
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            StateKind::OauthState,
            StateKind::WebauthnChallenge,
            StateKind::SamlRequest,
            StateKind::TempToken,
        ] {
            let encoded = serde_json::to_string(&kind).unwrap();
            assert_eq!(encoded, format!("\"{}\"", kind.as_str()));
            let decoded: StateKind = serde_json::from_str(&encoded).unwrap();
            assert_eq!(decoded, kind);
        }
    }

    #[test]
    fn test_new_entry_not_expired() {
        let entry = StateData::new("k", StateKind::OauthState, json!({"a": 1}), 60);
        assert!(!entry.is_expired());
        assert_eq!(entry.expires_at, entry.created_at + Duration::seconds(60));
    }

    #[test]
    fn test_zero_ttl_expires_immediately() {
        let entry = StateData::new("k", StateKind::TempToken, json!(null), 0);
        assert!(entry.is_expired());
    }
}
