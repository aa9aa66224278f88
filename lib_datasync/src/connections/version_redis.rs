//! Redis-backed version store.
//!
//! Each kind lives under its own key, so a commit is a single `SET` and cannot
//! leave a half-written value behind.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use crate::errors::{Result, SyncError};
use crate::model::{DataKind, StoredVersions, Version};

use super::version_store::VersionStore;

const GAME_DATA_VERSION_KEY: &str = "meta:latestGamedataVersion";
const LOCALIZATION_VERSION_KEY: &str = "meta:latestLocalizationBundleVersion";

fn key_for(kind: DataKind) -> &'static str {
    match kind {
        DataKind::GameData => GAME_DATA_VERSION_KEY,
        DataKind::Localization => LOCALIZATION_VERSION_KEY,
    }
}

#[derive(Clone)]
pub struct RedisVersionStore {
    manager: ConnectionManager,
}

impl RedisVersionStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url).map_err(|e| SyncError::Config(e.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|e| SyncError::PersistenceError(format!("connect: {e}")))?;
        Ok(Self { manager })
    }

    pub fn from_manager(manager: ConnectionManager) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VersionStore for RedisVersionStore {
    async fn get_current(&self) -> Result<StoredVersions> {
        let mut conn = self.manager.clone();
        let (game_data, localization): (Option<String>, Option<String>) = conn
            .mget(&[GAME_DATA_VERSION_KEY, LOCALIZATION_VERSION_KEY])
            .await
            .map_err(|e| SyncError::PersistenceError(format!("MGET versions: {e}")))?;
        Ok(StoredVersions {
            game_data: game_data.map(Version::new),
            localization: localization.map(Version::new),
        })
    }

    async fn commit(&self, kind: DataKind, version: &Version) -> Result<()> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .set(key_for(kind), version.as_str())
            .await
            .map_err(|e| SyncError::PersistenceError(format!("SET {}: {e}", key_for(kind))))?;
        Ok(())
    }
}
