//! Fixed-map backend for tests and embedded setups.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::reference::SecretReference;
use crate::{SecretBackend, SecretError, SecretValue};

/// Backend serving values from a fixed map keyed by reference string.
///
/// Counts fetches so tests can assert cache behavior.
#[derive(Debug, Default)]
pub struct StaticSecretBackend {
    values: HashMap<String, Vec<u8>>,
    fetches: AtomicUsize,
}

impl StaticSecretBackend {
    #[must_use]
    pub fn new(values: HashMap<String, Vec<u8>>) -> Self {
        Self {
            values,
            fetches: AtomicUsize::new(0),
        }
    }

    /// Convenience constructor from string pairs.
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        )
    }

    /// Number of fetches that reached this backend.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretBackend for StaticSecretBackend {
    async fn fetch(&self, reference: &SecretReference) -> Result<SecretValue, SecretError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let key = reference.to_string();
        self.values
            .get(&key)
            .map(|v| SecretValue::new(key.clone(), v.clone()))
            .ok_or(SecretError::NotFound { reference: key })
    }

    async fn health_check(&self) -> Result<bool, SecretError> {
        Ok(true)
    }

    fn backend_type(&self) -> &'static str {
        "static"
    }
}
