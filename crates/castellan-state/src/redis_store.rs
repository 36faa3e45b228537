//! Redis-backed state store.
//!
//! The primary backend: a shared, networked key-value store reachable
//! by every broker instance. Keys are namespaced with a configurable
//! prefix so several deployments can share one Redis. TTLs are
//! enforced by Redis itself *and* re-checked on read.

use async_trait::async_trait;
use redis::{AsyncCommands, Client};

use crate::types::{StateData, StateKind};
use crate::{StateError, StateStore};

/// Distributed state store on Redis.
#[derive(Debug, Clone)]
pub struct RedisStateStore {
    client: Client,
    prefix: String,
}

impl RedisStateStore {
    /// Connect and verify the server is responsive.
    pub async fn connect(connection_string: &str, namespace: &str) -> Result<Self, StateError> {
        let client = Client::open(connection_string).map_err(|e| StateError::Backend {
            backend: "redis".to_string(),
            detail: format!("Failed to create client: {e}"),
        })?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StateError::Backend {
                backend: "redis".to_string(),
                detail: format!("Failed to connect: {e}"),
            })?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StateError::Backend {
                backend: "redis".to_string(),
                detail: format!("Ping failed: {e}"),
            })?;

        tracing::debug!(namespace, "Redis state store connected");

        Ok(Self {
            client,
            prefix: format!("{namespace}:state:"),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StateError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StateError::Backend {
                backend: "redis".to_string(),
                detail: e.to_string(),
            })
    }
}

fn backend_err(e: redis::RedisError) -> StateError {
    StateError::Backend {
        backend: "redis".to_string(),
        detail: e.to_string(),
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn set_state(
        &self,
        key: &str,
        payload: serde_json::Value,
        kind: StateKind,
        ttl_seconds: i64,
    ) -> Result<(), StateError> {
        let entry = StateData::new(key, kind, payload, ttl_seconds);
        let encoded = serde_json::to_string(&entry)?;
        let mut conn = self.connection().await?;
        let () = conn
            .set_ex(self.key(key), encoded, ttl_seconds.max(1) as u64)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<StateData>, StateError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(self.key(key)).await.map_err(backend_err)?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let entry: StateData = serde_json::from_str(&raw)?;
        // Redis should have expired the key already; re-check in case
        // of clock or eviction-timing differences.
        if entry.is_expired() {
            let () = conn.del(self.key(key)).await.map_err(backend_err)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn delete_state(&self, key: &str) -> Result<(), StateError> {
        let mut conn = self.connection().await?;
        let () = conn.del(self.key(key)).await.map_err(backend_err)?;
        Ok(())
    }

    async fn increment(&self, key: &str, ttl_seconds: Option<i64>) -> Result<i64, StateError> {
        let full_key = self.key(key);
        let mut conn = self.connection().await?;
        let value: i64 = conn.incr(&full_key, 1).await.map_err(backend_err)?;
        if value == 1 {
            if let Some(ttl) = ttl_seconds {
                let () = conn.expire(&full_key, ttl).await.map_err(backend_err)?;
            }
        }
        Ok(value)
    }

    async fn health_check(&self) -> bool {
        let Ok(mut conn) = self.connection().await else {
            return false;
        };
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}
