//! Upstream seams used by the orchestrator and the player service.
//!
//! Implementations perform exactly one upstream call per method and never retry;
//! retry policy belongs to the caller.

use async_trait::async_trait;

use crate::errors::Result;
use crate::model::{AllyCode, Metadata, Payload, Segment, Version};

/// Retrieves versioned content from the content service.
#[async_trait]
pub trait SegmentFetcher: Send + Sync {
    /// Current upstream versions.
    async fn fetch_metadata(&self) -> Result<Metadata>;

    /// One game-data segment of `version`.
    async fn fetch_segment(&self, version: &Version, segment: Segment) -> Result<Payload>;

    /// The localization bundle `version`, unpacked into language files when `unzip` is set.
    async fn fetch_localization(&self, version: &Version, unzip: bool) -> Result<Payload>;
}

/// Looks up individual player records.
#[async_trait]
pub trait PlayerSource: Send + Sync {
    async fn fetch_player(&self, ally_code: &AllyCode) -> Result<Payload>;
}
