//! # Version Store
//!
//! Durable record of the last fully synchronized version of each data kind.
//! A committed version implies every segment of that version is cached.
//!
//! `commit` is all-or-nothing in every backend: a failed commit leaves the
//! previously committed value readable.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tempfile::NamedTempFile;

use crate::errors::{Result, SyncError};
use crate::model::{DataKind, StoredVersions, Version};

/// Source of truth for "have we already processed this version".
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Returns the committed versions, `(None, None)` on a cold start.
    async fn get_current(&self) -> Result<StoredVersions>;

    /// Persists `version` for `kind`, leaving the other kind untouched.
    async fn commit(&self, kind: DataKind, version: &Version) -> Result<()>;
}

/// Process-local store. Versions are lost on restart, so every start is a cold start.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    versions: RwLock<StoredVersions>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with already committed versions.
    pub fn with_versions(versions: StoredVersions) -> Self {
        Self {
            versions: RwLock::new(versions),
        }
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn get_current(&self) -> Result<StoredVersions> {
        self.versions
            .read()
            .map(|v| v.clone())
            .map_err(|_| SyncError::PersistenceError("version lock poisoned".into()))
    }

    async fn commit(&self, kind: DataKind, version: &Version) -> Result<()> {
        let mut versions = self
            .versions
            .write()
            .map_err(|_| SyncError::PersistenceError("version lock poisoned".into()))?;
        versions.set(kind, version.clone());
        Ok(())
    }
}

/// JSON file store.
///
/// Commits write a sibling temp file and rename it over the target, so the file
/// on disk is always either the previous document or the new one.
#[derive(Debug, Clone)]
pub struct FileVersionStore {
    path: PathBuf,
}

impl FileVersionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<StoredVersions> {
        match std::fs::read_to_string(path) {
            Ok(body) => serde_json::from_str(&body).map_err(|e| {
                SyncError::PersistenceError(format!("corrupt {}: {e}", path.display()))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredVersions::default()),
            Err(e) => Err(SyncError::PersistenceError(format!(
                "read {}: {e}",
                path.display()
            ))),
        }
    }

    fn store(path: &Path, versions: &StoredVersions) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let persist_err =
            |e: std::io::Error| SyncError::PersistenceError(format!("write {}: {e}", path.display()));

        std::fs::create_dir_all(&dir).map_err(persist_err)?;
        let body = serde_json::to_vec_pretty(versions)
            .map_err(|e| SyncError::PersistenceError(e.to_string()))?;
        let mut tmp = NamedTempFile::new_in(&dir).map_err(persist_err)?;
        tmp.write_all(&body).map_err(persist_err)?;
        tmp.as_file().sync_all().map_err(persist_err)?;
        tmp.persist(path).map_err(|e| persist_err(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl VersionStore for FileVersionStore {
    async fn get_current(&self) -> Result<StoredVersions> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || Self::load(&path))
            .await
            .map_err(|e| SyncError::PersistenceError(format!("join: {e}")))?
    }

    async fn commit(&self, kind: DataKind, version: &Version) -> Result<()> {
        let path = self.path.clone();
        let version = version.clone();
        tokio::task::spawn_blocking(move || {
            let mut versions = Self::load(&path)?;
            versions.set(kind, version);
            Self::store(&path, &versions)
        })
        .await
        .map_err(|e| SyncError::PersistenceError(format!("join: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_starts_cold() {
        let store = MemoryVersionStore::new();
        assert_eq!(store.get_current().await.unwrap(), StoredVersions::default());
        store.commit(DataKind::Localization, &Version::from("loc-9")).await.unwrap();
        let current = store.get_current().await.unwrap();
        assert_eq!(current.localization, Some(Version::from("loc-9")));
        assert_eq!(current.game_data, None);
    }

    #[tokio::test]
    async fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("versions.json");
        let store = FileVersionStore::new(&path);

        assert_eq!(store.get_current().await.unwrap(), StoredVersions::default());
        store.commit(DataKind::GameData, &Version::from("7")).await.unwrap();
        store.commit(DataKind::Localization, &Version::from("loc-2")).await.unwrap();

        let reopened = FileVersionStore::new(&path);
        let current = reopened.get_current().await.unwrap();
        assert_eq!(current.game_data, Some(Version::from("7")));
        assert_eq!(current.localization, Some(Version::from("loc-2")));
    }

    #[tokio::test]
    async fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("versions.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = FileVersionStore::new(&path);
        assert!(matches!(
            store.get_current().await,
            Err(SyncError::PersistenceError(_))
        ));
        // A failed commit must not replace the unreadable document with a guess.
        assert!(store.commit(DataKind::GameData, &Version::from("8")).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
