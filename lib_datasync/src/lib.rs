//! # lib_datasync
//!
//! Keeps a cache synchronized with a versioned content service.
//!
//! A sync epoch polls upstream metadata, compares the game-data and localization
//! versions with the committed ones, refetches the segments of every changed
//! kind, diffs them against the previous version, writes them under versioned
//! cache keys and commits the new version only once every segment of that kind
//! has landed. Each epoch ends with one notification event.
//!
//! Modules are grouped by folder and the heavier ones are feature gated:
//! - `connections`: Redis cache and version-store backends.
//! - `retrieve`: HTTP content client and webhook sink.
//! - `loggers`: subscriber setup for binaries.
//! - `full`: all of the above.

#![forbid(unsafe_code)]

pub mod configs;
pub mod connections;
pub mod core;
pub mod errors;
pub mod model;

#[cfg(feature = "loggers")]
pub mod loggers;
#[cfg(feature = "retrieve")]
pub mod retrieve;

pub use errors::{Result, SyncError};
