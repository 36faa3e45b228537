//! Environment variable backend, development only.
//!
//! Must be explicitly enabled, and refuses to construct in a
//! production posture: env vars leak through process listings and
//! crash dumps, which is acceptable on a laptop and nowhere else.

use async_trait::async_trait;

use crate::reference::SecretReference;
use crate::{SecretBackend, SecretError, SecretValue};

/// Deployment posture, used to gate development-only backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Posture {
    Development,
    Production,
}

impl Posture {
    /// Parse from an environment string (`production`/`prod` vs
    /// anything else).
    #[must_use]
    pub fn from_env_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }
}

/// Development-only backend resolving `env:VAR` references.
#[derive(Debug)]
pub struct EnvSecretBackend {
    _private: (),
}

impl EnvSecretBackend {
    /// Construct the backend; refused in a production posture.
    pub fn new(posture: Posture) -> Result<Self, SecretError> {
        if posture == Posture::Production {
            return Err(SecretError::ConfigError {
                detail: "env secret backend is refused in production".to_string(),
            });
        }
        tracing::warn!("Using env secret backend; development only");
        Ok(Self { _private: () })
    }
}

#[async_trait]
impl SecretBackend for EnvSecretBackend {
    async fn fetch(&self, reference: &SecretReference) -> Result<SecretValue, SecretError> {
        let SecretReference::Env { var } = reference else {
            return Err(SecretError::ConfigError {
                detail: format!(
                    "env backend cannot resolve '{}' references",
                    reference.backend()
                ),
            });
        };

        match std::env::var(var) {
            Ok(value) if !value.is_empty() => {
                Ok(SecretValue::new(reference.to_string(), value.into_bytes()))
            }
            // Empty value treated as not found
            _ => Err(SecretError::NotFound {
                reference: reference.to_string(),
            }),
        }
    }

    async fn health_check(&self) -> Result<bool, SecretError> {
        Ok(true)
    }

    fn backend_type(&self) -> &'static str {
        "env"
    }
}
