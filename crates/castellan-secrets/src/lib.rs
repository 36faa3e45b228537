//! Secret reference resolution for the castellan broker.
//!
//! Plugins never hold raw key material in their configuration.
//! Instead they carry opaque references in the `backend:path#key`
//! grammar, resolved at use time through a pluggable `SecretBackend`
//! with short-TTL caching and access auditing.
//!
//! # Usage
//!
//! ```rust,ignore
//! use castellan_secrets::{SecretManager, SecretReference};
//!
//! let reference: SecretReference = "vault:kv/webhooks/github#signing_key".parse()?;
//! let value = manager.get_secret(&reference, "conn-42").await?;
//! let key = value.as_str()?;
//! ```

pub mod audit;
pub mod backend;
pub mod manager;
pub mod reference;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use audit::{AuditSink, SecretAccessRecord, TracingAuditSink};
pub use backend::env::{EnvSecretBackend, Posture};
pub use backend::r#static::StaticSecretBackend;
pub use manager::SecretManager;
pub use reference::SecretReference;

/// Errors returned by secret resolution.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    /// Reference does not resolve to a secret in the backend.
    #[error("Secret not found: '{reference}'")]
    NotFound { reference: String },

    /// Backend is unreachable (network error, auth failure). Thrown,
    /// never swallowed: the caller owns the retry policy.
    #[error("Secret backend '{backend}' unavailable: {detail}")]
    BackendUnavailable { backend: String, detail: String },

    /// Resolved value is malformed (wrong format, empty, corrupt).
    #[error("Invalid secret value for '{reference}': {detail}")]
    InvalidValue { reference: String, detail: String },

    /// Reference string does not match the `backend:path#key` grammar.
    #[error("Invalid secret reference '{input}': {detail}")]
    InvalidReference { input: String, detail: String },

    /// Backend configuration error.
    #[error("Secret backend configuration error: {detail}")]
    ConfigError { detail: String },
}

/// A resolved secret value.
///
/// The only place in the broker where a raw secret exists at rest is
/// inside this type, transiently, on the retrieval path.
#[derive(Clone)]
pub struct SecretValue {
    /// The reference this value was resolved from.
    pub reference: String,
    /// Raw secret bytes.
    pub value: Vec<u8>,
    /// When this value was fetched from the backend.
    pub loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretValue")
            .field("reference", &self.reference)
            .field("value", &"[REDACTED]")
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

impl SecretValue {
    pub fn new(reference: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            reference: reference.into(),
            value,
            loaded_at: Utc::now(),
        }
    }

    /// Interpret the value as UTF-8 text.
    pub fn as_str(&self) -> Result<&str, SecretError> {
        std::str::from_utf8(&self.value).map_err(|e| SecretError::InvalidValue {
            reference: self.reference.clone(),
            detail: format!("Not valid UTF-8: {e}"),
        })
    }
}

/// Backend that resolves references to live values.
///
/// Concrete networked backends (Vault, cloud secret managers) plug in
/// behind this trait; the broker core only ships the development env
/// backend and a static in-memory backend for tests.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    /// Fetch the value a reference points at.
    async fn fetch(&self, reference: &SecretReference) -> Result<SecretValue, SecretError>;

    /// Whether the backend is reachable and operational.
    async fn health_check(&self) -> Result<bool, SecretError>;

    /// Backend type name for logging and audit records.
    fn backend_type(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_value_debug_is_redacted() {
        let sv = SecretValue::new("env:TOKEN", b"hunter2".to_vec());
        let printed = format!("{sv:?}");
        assert!(printed.contains("[REDACTED]"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_secret_value_as_str() {
        let sv = SecretValue::new("env:TOKEN", b"plain".to_vec());
        assert_eq!(sv.as_str().unwrap(), "plain");

        let sv = SecretValue::new("env:TOKEN", vec![0xFF, 0xFE]);
        assert!(matches!(
            sv.as_str(),
            Err(SecretError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_error_display_never_contains_value() {
        let err = SecretError::NotFound {
            reference: "vault:kv/app#key".to_string(),
        };
        assert_eq!(err.to_string(), "Secret not found: 'vault:kv/app#key'");
    }
}
