//! Short-lived flow-correlation state shared across broker instances.
//!
//! Authentication flows that span an asynchronous callback (OAuth CSRF
//! state, SAML request correlation, challenge nonces) need a view of
//! their correlation data that is consistent across every broker
//! instance. This crate provides a `StateStore` trait with a Redis
//! primary backend and an in-process fallback for development.
//!
//! # Usage
//!
//! ```rust,ignore
//! use castellan_state::{RedisStateStore, StateKind, StateStore};
//!
//! let store = RedisStateStore::connect("redis://127.0.0.1/", "castellan").await?;
//! store.set_state("saml:request:_id42", payload, StateKind::SamlRequest, 600).await?;
//! let entry = store.get_state("saml:request:_id42").await?;
//! ```

pub mod memory;
#[cfg(feature = "redis-backend")]
pub mod redis_store;
pub mod types;

use async_trait::async_trait;

pub use memory::MemoryStateStore;
#[cfg(feature = "redis-backend")]
pub use redis_store::RedisStateStore;
pub use types::{StateData, StateKind};

/// Errors returned by state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Backend is unreachable or returned a protocol error.
    #[error("State backend '{backend}' unavailable: {detail}")]
    Backend { backend: String, detail: String },

    /// Stored payload could not be serialized or deserialized.
    #[error("State serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Shared store for short-lived flow-correlation data.
///
/// Every entry carries a finite, explicit expiry. Reads re-check the
/// expiry even when the backend is expected to auto-expire keys, to
/// guard against clock or eviction-timing differences between
/// instances.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store a payload under `key` with an absolute expiry of
    /// `ttl_seconds` from now.
    async fn set_state(
        &self,
        key: &str,
        payload: serde_json::Value,
        kind: StateKind,
        ttl_seconds: i64,
    ) -> Result<(), StateError>;

    /// Fetch the entry for `key`, or `None` if absent or past expiry.
    async fn get_state(&self, key: &str) -> Result<Option<StateData>, StateError>;

    /// Remove the entry for `key`. Deleting an absent key is not an
    /// error.
    async fn delete_state(&self, key: &str) -> Result<(), StateError>;

    /// Atomically increment a counter, returning the new value. When
    /// `ttl_seconds` is given it is applied on first creation only.
    async fn increment(&self, key: &str, ttl_seconds: Option<i64>) -> Result<i64, StateError>;

    /// Whether the backend is currently reachable.
    async fn health_check(&self) -> bool;
}
