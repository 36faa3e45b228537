//! Reference resolution with caching and auditing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::audit::{AuditSink, SecretAccessRecord, TracingAuditSink};
use crate::reference::SecretReference;
use crate::{SecretBackend, SecretError, SecretValue};

/// Default cache TTL for resolved values (5 minutes).
pub const DEFAULT_CACHE_TTL_SECONDS: i64 = 300;

#[derive(Clone)]
struct CachedValue {
    value: SecretValue,
    expires_at: DateTime<Utc>,
}

/// Resolves secret references through a backend with short-TTL
/// caching and access auditing.
///
/// The cache is keyed by `(reference, connection_id)` so one
/// connection can never observe a value resolved for another, even
/// when both use the same reference string.
pub struct SecretManager {
    backend: Arc<dyn SecretBackend>,
    cache: RwLock<HashMap<(String, String), CachedValue>>,
    cache_ttl_seconds: i64,
    audit: Arc<dyn AuditSink>,
}

impl std::fmt::Debug for SecretManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretManager")
            .field("backend", &self.backend.backend_type())
            .field("cache_ttl_seconds", &self.cache_ttl_seconds)
            .finish()
    }
}

impl SecretManager {
    /// Create a manager with the default TTL and tracing audit sink.
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self::with_options(
            backend,
            DEFAULT_CACHE_TTL_SECONDS,
            Arc::new(TracingAuditSink),
        )
    }

    pub fn with_options(
        backend: Arc<dyn SecretBackend>,
        cache_ttl_seconds: i64,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            backend,
            cache: RwLock::new(HashMap::new()),
            cache_ttl_seconds,
            audit,
        }
    }

    /// Resolve a reference for a connection.
    ///
    /// Cache hits do not touch the backend and produce no audit
    /// record; each backend retrieval produces exactly one record,
    /// written before the value is returned. Backend failures
    /// propagate so the caller can apply its own retry policy.
    pub async fn get_secret(
        &self,
        reference: &SecretReference,
        connection_id: &str,
    ) -> Result<SecretValue, SecretError> {
        let cache_key = (reference.to_string(), connection_id.to_string());

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&cache_key) {
                if Utc::now() < cached.expires_at {
                    tracing::debug!(reference = %cache_key.0, "Secret cache hit");
                    return Ok(cached.value.clone());
                }
            }
        }

        let result = self.backend.fetch(reference).await;

        self.audit.record(SecretAccessRecord {
            reference: cache_key.0.clone(),
            backend: self.backend.backend_type(),
            connection_id: connection_id.to_string(),
            success: result.is_ok(),
            at: Utc::now(),
        });

        let value = result?;

        let mut cache = self.cache.write().await;
        cache.insert(
            cache_key,
            CachedValue {
                value: value.clone(),
                expires_at: Utc::now() + Duration::seconds(self.cache_ttl_seconds),
            },
        );

        Ok(value)
    }

    /// Drop a cached entry, forcing the next resolution to hit the
    /// backend.
    pub async fn invalidate(&self, reference: &SecretReference, connection_id: &str) {
        let mut cache = self.cache.write().await;
        cache.remove(&(reference.to_string(), connection_id.to_string()));
    }

    /// Whether the backing store is reachable.
    pub async fn health_check(&self) -> Result<bool, SecretError> {
        self.backend.health_check().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::r#static::StaticSecretBackend;
    use std::sync::Mutex;

    struct RecordingSink {
        records: Mutex<Vec<SecretAccessRecord>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
            }
        }
    }

    impl AuditSink for RecordingSink {
        fn record(&self, record: SecretAccessRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn manager_with(
        ttl: i64,
    ) -> (Arc<StaticSecretBackend>, Arc<RecordingSink>, SecretManager) {
        let backend = Arc::new(StaticSecretBackend::from_pairs(&[(
            "vault:kv/hooks#key",
            "rotating-key-1",
        )]));
        let sink = Arc::new(RecordingSink::new());
        let manager = SecretManager::with_options(
            backend.clone() as Arc<dyn SecretBackend>,
            ttl,
            sink.clone() as Arc<dyn AuditSink>,
        );
        (backend, sink, manager)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_backend_and_audit() {
        let (backend, sink, manager) = manager_with(300);
        let reference: SecretReference = "vault:kv/hooks#key".parse().unwrap();

        let first = manager.get_secret(&reference, "conn-1").await.unwrap();
        let second = manager.get_secret(&reference, "conn-1").await.unwrap();

        assert_eq!(first.as_str().unwrap(), second.as_str().unwrap());
        assert_eq!(backend.fetch_count(), 1);
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let (backend, _, manager) = manager_with(0);
        let reference: SecretReference = "vault:kv/hooks#key".parse().unwrap();

        manager.get_secret(&reference, "conn-1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        manager.get_secret(&reference, "conn-1").await.unwrap();

        assert_eq!(backend.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_is_per_connection() {
        let (backend, _, manager) = manager_with(300);
        let reference: SecretReference = "vault:kv/hooks#key".parse().unwrap();

        manager.get_secret(&reference, "conn-1").await.unwrap();
        manager.get_secret(&reference, "conn-2").await.unwrap();

        // Same reference, different connection: no shared entry.
        assert_eq!(backend.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_audit_record_written_on_failure() {
        let (_, sink, manager) = manager_with(300);
        let reference: SecretReference = "vault:kv/unknown#key".parse().unwrap();

        let result = manager.get_secret(&reference, "conn-1").await;
        assert!(matches!(result, Err(SecretError::NotFound { .. })));

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
    }

    #[tokio::test]
    async fn test_audit_record_never_contains_value() {
        let (_, sink, manager) = manager_with(300);
        let reference: SecretReference = "vault:kv/hooks#key".parse().unwrap();
        manager.get_secret(&reference, "conn-1").await.unwrap();

        let records = sink.records.lock().unwrap();
        let printed = format!("{:?}", records[0]);
        assert!(!printed.contains("rotating-key-1"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (backend, _, manager) = manager_with(300);
        let reference: SecretReference = "vault:kv/hooks#key".parse().unwrap();

        manager.get_secret(&reference, "conn-1").await.unwrap();
        manager.invalidate(&reference, "conn-1").await;
        manager.get_secret(&reference, "conn-1").await.unwrap();

        assert_eq!(backend.fetch_count(), 2);
    }
}
