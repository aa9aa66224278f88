//! # Game Data Segments
//!
//! The content service splits game data into four partial segments. Requesting a
//! partial segment still returns every top-level key, with keys owned by other
//! segments present but empty. Each variant therefore declares the keys it owns,
//! and diffing only ever looks at those keys.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Equipment, materials, skills and account cosmetics.
const PARTIAL_1_KEYS: &[&str] = &[
    "category",
    "unlockAnnouncementDefinition",
    "skill",
    "equipment",
    "effectIconPriority",
    "battleEnvironments",
    "eventSampling",
    "targetingSet",
    "requirement",
    "powerUpBundle",
    "guildBanner",
    "battleTargetingRule",
    "persistentVfx",
    "material",
    "playerTitle",
    "playerPortrait",
    "timeZoneChangeConfig",
    "environmentCollection",
    "socialStatus",
];

/// Abilities, raids and stat mods.
const PARTIAL_2_KEYS: &[&str] = &[
    "ability",
    "statProgression",
    "challenge",
    "warDefinition",
    "statMod",
    "statModSet",
    "modRecommendation",
    "raidConfig",
    "mechanicDefinition",
];

/// Relic tiers and units.
const PARTIAL_3_KEYS: &[&str] = &["relicTierDefinition", "units"];

/// Artifacts, campaigns, datacrons and the remaining tables.
const PARTIAL_4_KEYS: &[&str] = &[
    "xpTable",
    "table",
    "recipe",
    "artifactDefinition",
    "artifactTierDefinition",
    "campaign",
    "datacronSet",
    "datacronTemplate",
    "datacronAffixTemplateSet",
    "conquestDefinition",
    "territoryBattleDefinition",
    "territoryWarDefinition",
    "galacticBundle",
    "scheduledEvent",
    "linkedStoreItem",
];

/// One requestable slice of game data.
///
/// The derived ordering is the processing order: `Full` first, then the partials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Segment {
    /// The complete game data; semantically the union of all partials.
    Full,
    #[serde(rename = "PARTIAL_1")]
    Partial1,
    #[serde(rename = "PARTIAL_2")]
    Partial2,
    #[serde(rename = "PARTIAL_3")]
    Partial3,
    #[serde(rename = "PARTIAL_4")]
    Partial4,
}

impl Segment {
    /// Every segment in processing order.
    pub const ALL: [Segment; 5] = [
        Segment::Full,
        Segment::Partial1,
        Segment::Partial2,
        Segment::Partial3,
        Segment::Partial4,
    ];

    /// The partial segments in processing order.
    pub const PARTIALS: [Segment; 4] = [
        Segment::Partial1,
        Segment::Partial2,
        Segment::Partial3,
        Segment::Partial4,
    ];

    /// Value sent as `requestSegment` on the `data` endpoint.
    pub fn request_code(self) -> u8 {
        match self {
            Segment::Full => 0,
            Segment::Partial1 => 1,
            Segment::Partial2 => 2,
            Segment::Partial3 => 3,
            Segment::Partial4 => 4,
        }
    }

    /// Upper-case label used in logs and notifications.
    pub fn label(self) -> &'static str {
        match self {
            Segment::Full => "FULL",
            Segment::Partial1 => "PARTIAL_1",
            Segment::Partial2 => "PARTIAL_2",
            Segment::Partial3 => "PARTIAL_3",
            Segment::Partial4 => "PARTIAL_4",
        }
    }

    /// Top-level payload keys owned by this segment.
    ///
    /// `Full` owns the union of the partial scopes.
    pub fn owned_keys(self) -> Vec<&'static str> {
        match self {
            Segment::Full => Segment::PARTIALS
                .iter()
                .flat_map(|s| s.owned_keys())
                .collect(),
            Segment::Partial1 => PARTIAL_1_KEYS.to_vec(),
            Segment::Partial2 => PARTIAL_2_KEYS.to_vec(),
            Segment::Partial3 => PARTIAL_3_KEYS.to_vec(),
            Segment::Partial4 => PARTIAL_4_KEYS.to_vec(),
        }
    }

    /// Whether `key` belongs to this segment's scope.
    pub fn owns(self, key: &str) -> bool {
        match self {
            Segment::Full => Segment::PARTIALS.iter().any(|s| s.owns(key)),
            _ => self.owned_keys().contains(&key),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
