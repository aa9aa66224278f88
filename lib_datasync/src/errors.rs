//! # Error Taxonomy
//!
//! Every failure the synchronization engine can observe is expressed as a
//! [`SyncError`]. The enum is `Clone` so a failure can be stored inside an epoch
//! report and still be propagated to the caller.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors raised by the upstream client, the storage backends and the orchestrator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The upstream call did not complete within the configured timeout.
    #[error("Upstream timed out: {0}")]
    UpstreamTimeout(String),

    /// DNS failure, refused or reset connection, TLS failure.
    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    /// The content service answered with a non-2xx status.
    #[error("Upstream returned status {status}: {body}")]
    UpstreamError { status: u16, body: String },

    /// The content service answered 2xx but the body could not be decoded.
    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    /// The version store is unreachable or its contents are corrupt.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// The cache backend rejected or timed out a write or invalidation.
    #[error("Cache write error: {0}")]
    CacheWriteError(String),

    /// The cache backend failed while reading a key.
    #[error("Cache read error: {0}")]
    CacheReadError(String),

    /// A payload did not have the shape its declared scope requires.
    #[error("Diff comparison error: {0}")]
    DiffComparisonError(String),

    /// The supplied ally code is not nine digits.
    #[error("Invalid ally code: {0}")]
    InvalidAllyCode(String),

    /// Another epoch currently holds the orchestrator.
    #[error("A sync epoch is already in flight")]
    EpochInFlight,

    /// The epoch was cancelled before this step ran.
    #[error("Sync epoch cancelled")]
    Cancelled,

    /// A settings value failed validation.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Whether the orchestrator may retry the failed call.
    ///
    /// Only network-level upstream failures qualify. Status errors, decode errors
    /// and backend errors usually mean an outage or a contract change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::UpstreamTimeout(_) | SyncError::UpstreamUnreachable(_)
        )
    }

    /// Stable class name used in notifications and logs.
    pub fn class(&self) -> &'static str {
        match self {
            SyncError::UpstreamTimeout(_) => "UpstreamTimeout",
            SyncError::UpstreamUnreachable(_) => "UpstreamUnreachable",
            SyncError::UpstreamError { .. } => "UpstreamError",
            SyncError::MalformedResponse(_) => "MalformedResponse",
            SyncError::PersistenceError(_) => "PersistenceError",
            SyncError::CacheWriteError(_) => "CacheWriteError",
            SyncError::CacheReadError(_) => "CacheReadError",
            SyncError::DiffComparisonError(_) => "DiffComparisonError",
            SyncError::InvalidAllyCode(_) => "InvalidAllyCode",
            SyncError::EpochInFlight => "EpochInFlight",
            SyncError::Cancelled => "Cancelled",
            SyncError::Config(_) => "Config",
        }
    }
}

/// Serialized as `{"class": ..., "message": ...}` inside epoch reports.
impl Serialize for SyncError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SyncError", 2)?;
        state.serialize_field("class", self.class())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_failures_are_transient() {
        assert!(SyncError::UpstreamTimeout("data".into()).is_transient());
        assert!(SyncError::UpstreamUnreachable("reset".into()).is_transient());
        assert!(!SyncError::UpstreamError { status: 503, body: String::new() }.is_transient());
        assert!(!SyncError::PersistenceError("down".into()).is_transient());
        assert!(!SyncError::CacheWriteError("down".into()).is_transient());
    }

    #[test]
    fn status_error_message_carries_status_and_body() {
        let err = SyncError::UpstreamError { status: 404, body: "not found".into() };
        assert_eq!(err.to_string(), "Upstream returned status 404: not found");
        assert_eq!(err.class(), "UpstreamError");
    }

    #[test]
    fn serializes_class_and_message() {
        let json = serde_json::to_value(SyncError::CacheWriteError("SET k: busy".into())).unwrap();
        assert_eq!(json["class"], "CacheWriteError");
        assert_eq!(json["message"], "Cache write error: SET k: busy");
    }
}
