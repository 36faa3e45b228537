//! Secret backends shipped with the broker core.
//!
//! Networked backends (Vault, cloud secret managers) live behind the
//! `SecretBackend` trait and are wired in by the host.

pub mod env;
pub mod r#static;
