//! Broker-level error taxonomy.
//!
//! Validation failures are *not* errors: they come back as
//! `ValidationResult` / `AuthResult` values. Errors are reserved for
//! configuration problems caught before any crypto or network work,
//! and for transient backend failures the caller must see.

use castellan_secrets::SecretError;
use castellan_state::StateError;

/// Result type for plugin and registry operations.
pub type PluginResult<T> = Result<T, AuthError>;

/// Errors surfaced by the plugin contract and registry.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Invalid or missing configuration; fails fast before any
    /// crypto or network work.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A plugin with this id is already registered.
    #[error("Plugin already registered: {0}")]
    DuplicatePlugin(String),

    /// No plugin registered under this id.
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    /// Secret backend unreachable or reference unresolvable.
    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    /// Correlation-state backend unreachable.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Anything else that should abort the operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_error_converts() {
        let err: AuthError = SecretError::ConfigError {
            detail: "bad".to_string(),
        }
        .into();
        assert!(matches!(err, AuthError::Secret(_)));
    }

    #[test]
    fn test_state_error_converts() {
        let err: AuthError = StateError::Backend {
            backend: "redis".to_string(),
            detail: "down".to_string(),
        }
        .into();
        assert!(matches!(err, AuthError::State(_)));
        assert!(err.to_string().contains("redis"));
    }
}
