//! # Redis Cache Implementation
//!
//! Stores payloads as JSON strings with `SET ... EX`. A single `SET` replaces the
//! value atomically, so concurrent `GET`s see either the old or the new payload.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{Result, SyncError};
use crate::model::{CacheKey, Payload};

use super::cache::CacheWriter;

/// A handler for Redis cache interactions.
#[derive(Clone)]
pub struct RedisCache {
    /// Multiplexed connection that reconnects on its own.
    manager: ConnectionManager,
}

impl RedisCache {
    /// Opens a managed connection.
    ///
    /// # Arguments
    /// * `url` - The redis URL (e.g., "redis://:password@127.0.0.1:6379/").
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| SyncError::Config(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| SyncError::CacheWriteError(format!("connect: {e}")))?;
        Ok(Self { manager })
    }

    /// Wraps an existing connection manager, shared with other Redis users.
    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl CacheWriter for RedisCache {
    async fn write(&self, key: &CacheKey, payload: Arc<Payload>, ttl: Duration) -> Result<()> {
        let body = serde_json::to_string(payload.as_ref())
            .map_err(|e| SyncError::CacheWriteError(format!("serialize {key}: {e}")))?;
        let mut conn = self.manager.clone();
        // Redis rejects EX 0.
        let seconds = ttl.as_secs().max(1);
        let _: () = conn
            .set_ex(key.as_str(), body, seconds)
            .await
            .map_err(|e| SyncError::CacheWriteError(format!("SET {key}: {e}")))?;
        Ok(())
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<Arc<Payload>>> {
        let mut conn = self.manager.clone();
        let raw: Option<String> = conn
            .get(key.as_str())
            .await
            .map_err(|e| SyncError::CacheReadError(format!("GET {key}: {e}")))?;
        match raw {
            None => Ok(None),
            Some(body) => serde_json::from_str(&body)
                .map(|payload| Some(Arc::new(payload)))
                .map_err(|e| SyncError::CacheReadError(format!("decode {key}: {e}"))),
        }
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(key.as_str())
            .await
            .map_err(|e| SyncError::CacheWriteError(format!("DEL {key}: {e}")))?;
        Ok(())
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let mut conn = self.manager.clone();
        let found: bool = conn
            .exists(key.as_str())
            .await
            .map_err(|e| SyncError::CacheReadError(format!("EXISTS {key}: {e}")))?;
        Ok(found)
    }
}
