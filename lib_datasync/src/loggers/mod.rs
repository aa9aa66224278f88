//! # Logging
//!
//! Subscriber installation for binaries. Library code only emits `tracing` events.

/// `tracing-subscriber` registry with console and daily rolling file layers.
pub mod setup;

pub use setup::{prune_old_logs, setup_logging, LoggingError};
