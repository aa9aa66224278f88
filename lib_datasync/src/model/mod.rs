//! # Data Model
//!
//! Shared vocabulary of the synchronization engine: opaque version tokens, the
//! two data kinds tracked independently, segments, cache keys and player ally codes.

/// Cache key namespacing and default TTLs.
pub mod keys;
/// The closed set of game-data segments and their owned key scopes.
pub mod segment;

pub use keys::{CacheKey, GAME_DATA_TTL, LOCALIZATION_TTL, PLAYER_DATA_TTL};
pub use segment::Segment;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::{Result, SyncError};

/// Raw JSON payload as returned by the content service.
pub type Payload = serde_json::Value;

/// Opaque version identifier issued by upstream.
///
/// Versions are compared for equality only. They carry no ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Version {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The two independently versioned kinds of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    GameData,
    Localization,
}

impl DataKind {
    pub fn label(self) -> &'static str {
        match self {
            DataKind::GameData => "game data",
            DataKind::Localization => "localization",
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Last committed version of each kind. Both are `None` on a cold start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVersions {
    pub game_data: Option<Version>,
    pub localization: Option<Version>,
}

impl StoredVersions {
    pub fn get(&self, kind: DataKind) -> Option<&Version> {
        match kind {
            DataKind::GameData => self.game_data.as_ref(),
            DataKind::Localization => self.localization.as_ref(),
        }
    }

    pub fn set(&mut self, kind: DataKind, version: Version) {
        match kind {
            DataKind::GameData => self.game_data = Some(version),
            DataKind::Localization => self.localization = Some(version),
        }
    }
}

/// Response of the `metadata` endpoint. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub latest_gamedata_version: Version,
    pub latest_localization_bundle_version: Version,
}

impl Metadata {
    pub fn latest(&self, kind: DataKind) -> &Version {
        match kind {
            DataKind::GameData => &self.latest_gamedata_version,
            DataKind::Localization => &self.latest_localization_bundle_version,
        }
    }
}

/// One unit of fetch work inside an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchTarget {
    GameData(Segment),
    Localization,
}

impl FetchTarget {
    pub fn kind(self) -> DataKind {
        match self {
            FetchTarget::GameData(_) => DataKind::GameData,
            FetchTarget::Localization => DataKind::Localization,
        }
    }

    /// Cache key holding this target's payload for `version`.
    pub fn cache_key(self, version: &Version) -> CacheKey {
        match self {
            FetchTarget::GameData(segment) => CacheKey::game_data(version, segment),
            FetchTarget::Localization => CacheKey::localization(version),
        }
    }
}

impl fmt::Display for FetchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchTarget::GameData(segment) => write!(f, "{segment}"),
            FetchTarget::Localization => f.write_str("LOCALIZATION"),
        }
    }
}

/// A player's nine-digit ally code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllyCode(String);

impl AllyCode {
    /// Normalizes `raw` (dashes and surrounding whitespace removed) and validates it.
    pub fn parse(raw: &str) -> Result<Self> {
        let digits: String = raw.trim().chars().filter(|c| *c != '-').collect();
        if digits.len() == 9 && digits.chars().all(|c| c.is_ascii_digit()) {
            Ok(Self(digits))
        } else {
            Err(SyncError::InvalidAllyCode(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AllyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ally_code_accepts_dashed_form() {
        let code = AllyCode::parse(" 123-456-789 ").unwrap();
        assert_eq!(code.as_str(), "123456789");
    }

    #[test]
    fn ally_code_rejects_wrong_length_and_letters() {
        assert!(AllyCode::parse("12345678").is_err());
        assert!(AllyCode::parse("12345678a").is_err());
        assert!(matches!(
            AllyCode::parse("1234567890"),
            Err(SyncError::InvalidAllyCode(_))
        ));
    }

    #[test]
    fn metadata_ignores_extra_fields() {
        let json = serde_json::json!({
            "latestGamedataVersion": "7",
            "latestLocalizationBundleVersion": "loc-3",
            "assetVersion": 4200
        });
        let metadata: Metadata = serde_json::from_value(json).unwrap();
        assert_eq!(metadata.latest(DataKind::GameData).as_str(), "7");
        assert_eq!(metadata.latest(DataKind::Localization).as_str(), "loc-3");
    }

    #[test]
    fn stored_versions_set_one_kind_only() {
        let mut stored = StoredVersions::default();
        stored.set(DataKind::GameData, Version::from("6"));
        assert_eq!(stored.get(DataKind::GameData), Some(&Version::from("6")));
        assert_eq!(stored.get(DataKind::Localization), None);
    }
}
