//! Short-TTL liveness registry for `active-run:<instance>:<run_id>` keys.
//! The default backend is in-process; an optional `redis` backend (feature
//! `redis-backend`) makes the liveness signal visible across instances,
//! matching the teacher's already-optional `redis` dependency pattern.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use agentrun_core::RunId;

fn key_for(instance: &str, run_id: RunId) -> String {
    format!("active_run:{instance}:{run_id}")
}

#[derive(Debug, thiserror::Error)]
pub enum ActiveRunError {
    #[error("active-run registry backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait ActiveRunRegistry: Send + Sync {
    async fn set(&self, instance: &str, run_id: RunId, ttl: Duration) -> Result<(), ActiveRunError>;
    async fn refresh(&self, instance: &str, run_id: RunId, ttl: Duration) -> Result<(), ActiveRunError>;
    async fn delete(&self, instance: &str, run_id: RunId) -> Result<(), ActiveRunError>;
    async fn is_active(&self, instance: &str, run_id: RunId) -> Result<bool, ActiveRunError>;
}

pub struct InMemoryActiveRunRegistry {
    entries: RwLock<HashMap<String, Instant>>,
}

impl Default for InMemoryActiveRunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryActiveRunRegistry {
    pub fn new() -> Self {
        Self { entries: RwLock::new(HashMap::new()) }
    }
}

#[async_trait]
impl ActiveRunRegistry for InMemoryActiveRunRegistry {
    async fn set(&self, instance: &str, run_id: RunId, ttl: Duration) -> Result<(), ActiveRunError> {
        self.entries.write().await.insert(key_for(instance, run_id), Instant::now() + ttl);
        Ok(())
    }

    async fn refresh(&self, instance: &str, run_id: RunId, ttl: Duration) -> Result<(), ActiveRunError> {
        self.set(instance, run_id, ttl).await
    }

    async fn delete(&self, instance: &str, run_id: RunId) -> Result<(), ActiveRunError> {
        self.entries.write().await.remove(&key_for(instance, run_id));
        Ok(())
    }

    async fn is_active(&self, instance: &str, run_id: RunId) -> Result<bool, ActiveRunError> {
        let expiry = self.entries.read().await.get(&key_for(instance, run_id)).copied();
        Ok(expiry.is_some_and(|e| e > Instant::now()))
    }
}

#[cfg(feature = "redis-backend")]
pub mod redis_backend {
    use super::*;

    pub struct RedisActiveRunRegistry {
        client: redis::Client,
    }

    impl RedisActiveRunRegistry {
        pub fn new(redis_url: &str) -> Result<Self, ActiveRunError> {
            let client = redis::Client::open(redis_url).map_err(|e| ActiveRunError::Backend(e.to_string()))?;
            Ok(Self { client })
        }

        async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, ActiveRunError> {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| ActiveRunError::Backend(e.to_string()))
        }
    }

    #[async_trait]
    impl ActiveRunRegistry for RedisActiveRunRegistry {
        async fn set(&self, instance: &str, run_id: RunId, ttl: Duration) -> Result<(), ActiveRunError> {
            use redis::AsyncCommands;
            let mut conn = self.connection().await?;
            conn.set_ex::<_, _, ()>(key_for(instance, run_id), "1", ttl.as_secs().max(1))
                .await
                .map_err(|e| ActiveRunError::Backend(e.to_string()))
        }

        async fn refresh(&self, instance: &str, run_id: RunId, ttl: Duration) -> Result<(), ActiveRunError> {
            self.set(instance, run_id, ttl).await
        }

        async fn delete(&self, instance: &str, run_id: RunId) -> Result<(), ActiveRunError> {
            use redis::AsyncCommands;
            let mut conn = self.connection().await?;
            conn.del::<_, ()>(key_for(instance, run_id)).await.map_err(|e| ActiveRunError::Backend(e.to_string()))
        }

        async fn is_active(&self, instance: &str, run_id: RunId) -> Result<bool, ActiveRunError> {
            use redis::AsyncCommands;
            let mut conn = self.connection().await?;
            conn.exists(key_for(instance, run_id)).await.map_err(|e| ActiveRunError::Backend(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_is_active_within_ttl() {
        let registry = InMemoryActiveRunRegistry::new();
        let run_id = RunId::new();
        registry.set("instance-a", run_id, Duration::from_secs(30)).await.unwrap();
        assert!(registry.is_active("instance-a", run_id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_makes_it_inactive() {
        let registry = InMemoryActiveRunRegistry::new();
        let run_id = RunId::new();
        registry.set("instance-a", run_id, Duration::from_secs(30)).await.unwrap();
        registry.delete("instance-a", run_id).await.unwrap();
        assert!(!registry.is_active("instance-a", run_id).await.unwrap());
    }

    #[tokio::test]
    async fn expired_ttl_reports_inactive() {
        let registry = InMemoryActiveRunRegistry::new();
        let run_id = RunId::new();
        registry.set("instance-a", run_id, Duration::from_millis(10)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!registry.is_active("instance-a", run_id).await.unwrap());
    }
}
