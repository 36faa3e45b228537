//! Plugin contract and registry for the castellan broker.
//!
//! Every identity protocol the broker speaks — signed webhooks, SAML
//! SSO, OAuth2/JWT — is a plugin implementing one `AuthPlugin`
//! contract. The registry owns plugin registration, shutdown, and
//! protocol auto-detection; callers branch on a plugin's `FlowKind`,
//! never on its identity.
//!
//! # Usage
//!
//! ```rust,ignore
//! use castellan_core::{PluginRegistry, SharedServices};
//!
//! let registry = PluginRegistry::new(services);
//! registry.register(Arc::new(WebhookPlugin::new())).await?;
//! if let Some(requirements) = registry.detect_auth_type(endpoint).await {
//!     ...
//! }
//! ```

pub mod error;
pub mod plugin;
pub mod registry;
pub mod services;
pub mod types;

pub use error::{AuthError, PluginResult};
pub use plugin::AuthPlugin;
pub use registry::PluginRegistry;
pub use services::{AllowList, AuthEvent, EventSink, SharedServices};
pub use types::{
    AuthCallbackParams, AuthFailure, AuthFailureKind, AuthRequirements, AuthResult,
    AuthStartResult, CandidateCredentials, Credentials, FlowKind, ProtocolKind, ValidationResult,
};
