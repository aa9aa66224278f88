//! Deterministic cache keys.
//!
//! Layout: `player:<allyCode>`, `gamedata:<version>:<segmentCode>` and
//! `localization:<version>`. Game-data entries carry the segment code so the five
//! payloads of one version live side by side.

use std::fmt;
use std::time::Duration;

use super::{AllyCode, Segment, Version};

/// Player records are refreshed hourly.
pub const PLAYER_DATA_TTL: Duration = Duration::from_secs(3600);
/// Fallback expiry for game data. Version changes overwrite explicitly.
pub const GAME_DATA_TTL: Duration = Duration::from_secs(86_400);
/// Fallback expiry for localization bundles.
pub const LOCALIZATION_TTL: Duration = Duration::from_secs(86_400);

const PLAYER_KEY_PREFIX: &str = "player:";
const GAME_DATA_KEY_PREFIX: &str = "gamedata:";
const LOCALIZATION_KEY_PREFIX: &str = "localization:";

/// A fully qualified cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn player(ally_code: &AllyCode) -> Self {
        Self(format!("{PLAYER_KEY_PREFIX}{ally_code}"))
    }

    pub fn game_data(version: &Version, segment: Segment) -> Self {
        Self(format!(
            "{GAME_DATA_KEY_PREFIX}{version}:{}",
            segment.request_code()
        ))
    }

    pub fn localization(version: &Version) -> Self {
        Self(format!("{LOCALIZATION_KEY_PREFIX}{version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_follow_namespace_layout() {
        let version = Version::from("0.37.1:abc");
        assert_eq!(
            CacheKey::game_data(&version, Segment::Partial2).as_str(),
            "gamedata:0.37.1:abc:2"
        );
        assert_eq!(CacheKey::localization(&version).as_str(), "localization:0.37.1:abc");
        let code = AllyCode::parse("123456789").unwrap();
        assert_eq!(CacheKey::player(&code).as_str(), "player:123456789");
    }
}
