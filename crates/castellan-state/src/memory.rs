//! In-process fallback store.
//!
//! Correct only for a single broker instance. Construction logs an
//! explicit degradation warning; production deployments must use the
//! Redis backend so that every instance sees the same correlation
//! data.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::types::{StateData, StateKind};
use crate::{StateError, StateStore};

#[derive(Debug)]
struct Counter {
    value: i64,
    expires_at: Option<DateTime<Utc>>,
}

/// Single-instance, in-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Arc<RwLock<HashMap<String, StateData>>>,
    counters: Arc<RwLock<HashMap<String, Counter>>>,
}

impl MemoryStateStore {
    /// Create the fallback store, logging the degradation.
    #[must_use]
    pub fn new() -> Self {
        tracing::warn!(
            backend = "memory",
            "Using in-process state store; correlation data is not shared across instances"
        );
        Self::default()
    }

    /// Remove every expired entry and counter. Returns the number of
    /// entries reclaimed.
    pub async fn sweep_expired(&self) -> u64 {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let swept = (before - entries.len()) as u64;
        drop(entries);

        let mut counters = self.counters.write().await;
        counters.retain(|_, c| c.expires_at.is_none_or(|exp| exp > now));
        drop(counters);

        if swept > 0 {
            tracing::debug!(swept, "Reclaimed expired state entries");
        }
        swept
    }

    /// Spawn a background sweep on its own timer. The sweep never
    /// holds locks across an await point, so in-flight reads and
    /// writes are not blocked for the duration of a pass.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: StdDuration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                store.sweep_expired().await;
            }
        })
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn set_state(
        &self,
        key: &str,
        payload: serde_json::Value,
        kind: StateKind,
        ttl_seconds: i64,
    ) -> Result<(), StateError> {
        let entry = StateData::new(key, kind, payload, ttl_seconds);
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<StateData>, StateError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired())
            .cloned())
    }

    async fn delete_state(&self, key: &str) -> Result<(), StateError> {
        let mut entries = self.entries.write().await;
        entries.remove(key);
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_seconds: Option<i64>) -> Result<i64, StateError> {
        let now = Utc::now();
        let mut counters = self.counters.write().await;
        let counter = counters.entry(key.to_string()).or_insert_with(|| Counter {
            value: 0,
            expires_at: ttl_seconds.map(|ttl| now + Duration::seconds(ttl)),
        });
        if counter.expires_at.is_some_and(|exp| exp <= now) {
            counter.value = 0;
            counter.expires_at = ttl_seconds.map(|ttl| now + Duration::seconds(ttl));
        }
        counter.value += 1;
        Ok(counter.value)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_and_get() {
        let store = MemoryStateStore::new();
        store
            .set_state("k1", json!({"v": "d"}), StateKind::OauthState, 5)
            .await
            .unwrap();

        let entry = store.get_state("k1").await.unwrap().unwrap();
        assert_eq!(entry.kind, StateKind::OauthState);
        assert_eq!(entry.payload, json!({"v": "d"}));
    }

    #[tokio::test]
    async fn test_get_after_expiry_returns_none() {
        let store = MemoryStateStore::new();
        store
            .set_state("k1", json!(1), StateKind::TempToken, 0)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert!(store.get_state("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_absent_key_is_ok() {
        let store = MemoryStateStore::new();
        store.delete_state("never-stored").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let store = MemoryStateStore::new();
        store
            .set_state("k1", json!(1), StateKind::OauthState, 60)
            .await
            .unwrap();
        store.delete_state("k1").await.unwrap();
        assert!(store.get_state("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_increment_is_monotonic() {
        let store = MemoryStateStore::new();
        assert_eq!(store.increment("c", None).await.unwrap(), 1);
        assert_eq!(store.increment("c", None).await.unwrap(), 2);
        assert_eq!(store.increment("c", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_increment_resets_after_ttl() {
        let store = MemoryStateStore::new();
        assert_eq!(store.increment("c", Some(0)).await.unwrap(), 1);
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        // Expired counter starts over
        assert_eq!(store.increment("c", Some(60)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sweep_reclaims_only_expired() {
        let store = MemoryStateStore::new();
        store
            .set_state("dead", json!(1), StateKind::SamlRequest, 0)
            .await
            .unwrap();
        store
            .set_state("live", json!(2), StateKind::SamlRequest, 60)
            .await
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(store.sweep_expired().await, 1);
        assert!(store.get_state("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_health_check_always_ok() {
        let store = MemoryStateStore::new();
        assert!(store.health_check().await);
    }
}
