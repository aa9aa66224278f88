//! # Core Engine Module
//!
//! The synchronization engine and the services built around it.
//!
//! - **`source`**: upstream seams (`SegmentFetcher`, `PlayerSource`).
//! - **`diff`**: scope-respecting structural diff of two payloads.
//! - **`epoch`**: the record of one sync run and its outcome rules.
//! - **`orchestrator`**: the epoch state machine: version check, concurrent
//!   fetch with retries, cache writes, version commit.
//! - **`dispatcher`**: sync events and their fan-out to notification sinks.
//! - **`player`**: read-through player lookups.

pub mod diff;
pub mod dispatcher;
pub mod epoch;
pub mod orchestrator;
pub mod player;
pub mod source;

pub use diff::{diff, diff_bundle, DiffSummary, EntityId};
pub use dispatcher::{
    EventEmitter, EventField, LogSink, NotificationDispatcher, NotificationSink, Severity, SyncEvent,
};
pub use epoch::{
    DiffOutcome, EpochOutcome, EpochState, KindReport, SegmentReport, SyncEpoch, Trigger,
};
pub use orchestrator::SyncOrchestrator;
pub use player::{Lookup, PlayerService};
pub use source::{PlayerSource, SegmentFetcher};
