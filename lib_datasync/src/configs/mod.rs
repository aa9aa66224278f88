//! # Configuration Values
//!
//! Plain settings structs passed explicitly to constructors. Loading them from
//! files, the environment and the command line is the binary's job.

/// Upstream, cache, retry, sync and notification settings with defaults and validation.
pub mod settings;

pub use settings::{
    CacheSettings, NotifySettings, RetrySettings, SegmentPolicy, SyncPolicy, UpstreamSettings,
};
