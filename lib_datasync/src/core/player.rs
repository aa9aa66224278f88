//! Player lookups: a read-through cache over `player:<allyCode>`.
//!
//! Lookups run independently of sync epochs. The cache is an optimization only:
//! a failing read falls through to upstream and a failing write still returns
//! the fetched record.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::connections::CacheWriter;
use crate::core::source::PlayerSource;
use crate::errors::Result;
use crate::model::{AllyCode, CacheKey, Payload, PLAYER_DATA_TTL};

/// Where a player record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    Hit,
    Miss,
}

impl Lookup {
    pub fn as_header(self) -> &'static str {
        match self {
            Lookup::Hit => "HIT",
            Lookup::Miss => "MISS",
        }
    }
}

pub struct PlayerService {
    source: Arc<dyn PlayerSource>,
    cache: Arc<dyn CacheWriter>,
    ttl: Duration,
}

impl PlayerService {
    pub fn new(source: Arc<dyn PlayerSource>, cache: Arc<dyn CacheWriter>) -> Self {
        Self {
            source,
            cache,
            ttl: PLAYER_DATA_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the player record for `raw_ally_code`, dashed or plain.
    ///
    /// Fails with `InvalidAllyCode` before any I/O when the code is malformed.
    pub async fn get_player(&self, raw_ally_code: &str) -> Result<(Arc<Payload>, Lookup)> {
        let ally_code = AllyCode::parse(raw_ally_code)?;
        let key = CacheKey::player(&ally_code);

        match self.cache.read(&key).await {
            Ok(Some(record)) => {
                debug!(%key, "Player cache hit");
                return Ok((record, Lookup::Hit));
            }
            Ok(None) => debug!(%key, "Player cache miss"),
            Err(e) => warn!(%key, "Player cache read failed, asking upstream: {e}"),
        }

        let record = Arc::new(self.source.fetch_player(&ally_code).await?);
        if let Err(e) = self.cache.write(&key, Arc::clone(&record), self.ttl).await {
            warn!(%key, "Player cache write failed: {e}");
        }
        Ok((record, Lookup::Miss))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::MemoryCache;
    use crate::errors::SyncError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PlayerSource for CountingSource {
        async fn fetch_player(&self, ally_code: &AllyCode) -> Result<Payload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"allyCode": ally_code.as_str(), "name": "Rey"}))
        }
    }

    struct BrokenCache;

    #[async_trait]
    impl CacheWriter for BrokenCache {
        async fn write(&self, _: &CacheKey, _: Arc<Payload>, _: Duration) -> Result<()> {
            Err(SyncError::CacheWriteError("down".into()))
        }
        async fn read(&self, _: &CacheKey) -> Result<Option<Arc<Payload>>> {
            Err(SyncError::CacheReadError("down".into()))
        }
        async fn invalidate(&self, _: &CacheKey) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let source = Arc::new(CountingSource::default());
        let service = PlayerService::new(source.clone(), Arc::new(MemoryCache::new()));

        let (first, lookup) = service.get_player("123-456-789").await.unwrap();
        assert_eq!(lookup, Lookup::Miss);
        assert_eq!(first["allyCode"], "123456789");

        let (second, lookup) = service.get_player("123456789").await.unwrap();
        assert_eq!(lookup, Lookup::Hit);
        assert_eq!(first, second);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn broken_cache_falls_through_to_upstream() {
        let source = Arc::new(CountingSource::default());
        let service = PlayerService::new(source.clone(), Arc::new(BrokenCache));
        let (record, lookup) = service.get_player("987654321").await.unwrap();
        assert_eq!(lookup, Lookup::Miss);
        assert_eq!(record["name"], "Rey");
    }

    #[tokio::test]
    async fn invalid_code_never_reaches_upstream() {
        let source = Arc::new(CountingSource::default());
        let service = PlayerService::new(source.clone(), Arc::new(MemoryCache::new()));
        assert!(matches!(
            service.get_player("12-34").await,
            Err(SyncError::InvalidAllyCode(_))
        ));
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }
}
