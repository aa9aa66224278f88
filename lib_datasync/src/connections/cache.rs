//! # Cache Writer
//!
//! The [`CacheWriter`] contract and an in-process backend.
//!
//! A write replaces the whole entry for a key in one step. Payloads are shared
//! as `Arc<Payload>`, so a reader holds either the old payload or the new one and
//! can never observe a mix of the two.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::errors::{Result, SyncError};
use crate::model::{CacheKey, Payload};

/// Keyed payload storage with advisory expiry.
#[async_trait]
pub trait CacheWriter: Send + Sync {
    /// Stores `payload` under `key`, superseding any previous entry atomically.
    async fn write(&self, key: &CacheKey, payload: Arc<Payload>, ttl: Duration) -> Result<()>;

    /// Returns the live payload for `key`, or `None` when absent or expired.
    async fn read(&self, key: &CacheKey) -> Result<Option<Arc<Payload>>>;

    /// Removes `key`. Removing an absent key succeeds.
    async fn invalidate(&self, key: &CacheKey) -> Result<()>;

    /// Whether a live entry exists for `key`, without handing out the payload.
    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.read(key).await?.is_some())
    }
}

/// One stored payload and its expiry bookkeeping.
#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Arc<Payload>,
    ttl: Duration,
    written_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.written_at) >= self.ttl
    }
}

/// In-memory cache used for single-process deployments and tests.
///
/// Expired entries are dropped lazily on read and by [`MemoryCache::purge_expired`].
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    /// Number of stored entries, live or not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheWriter for MemoryCache {
    async fn write(&self, key: &CacheKey, payload: Arc<Payload>, ttl: Duration) -> Result<()> {
        let entry = CacheEntry {
            payload,
            ttl,
            written_at: Instant::now(),
        };
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SyncError::CacheWriteError("memory cache lock poisoned".into()))?;
        entries.insert(key.clone(), entry);
        Ok(())
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<Arc<Payload>>> {
        let now = Instant::now();
        {
            let entries = self
                .entries
                .read()
                .map_err(|_| SyncError::CacheReadError("memory cache lock poisoned".into()))?;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if !entry.is_expired(now) => {
                    return Ok(Some(Arc::clone(&entry.payload)))
                }
                Some(_) => {}
            }
        }

        // Expired: evict unless a fresh write landed in between.
        if let Ok(mut entries) = self.entries.write() {
            if entries.get(key).is_some_and(|e| e.is_expired(now)) {
                entries.remove(key);
            }
        }
        Ok(None)
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SyncError::CacheWriteError("memory cache lock poisoned".into()))?;
        entries.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        let now = Instant::now();
        let entries = self
            .entries
            .read()
            .map_err(|_| SyncError::CacheReadError("memory cache lock poisoned".into()))?;
        Ok(entries.get(key).is_some_and(|entry| !entry.is_expired(now)))
    }
}
