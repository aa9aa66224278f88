//! # Sync Epoch
//!
//! One run of the orchestrator from trigger to notification. The epoch is built
//! while the run progresses, finalized with an [`EpochOutcome`], handed to the
//! notification dispatcher and then kept only as the "last epoch" summary.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::core::diff::DiffSummary;
use crate::errors::SyncError;
use crate::model::{DataKind, FetchTarget, Version};

/// What started an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    Startup,
    Scheduled,
    Manual,
}

/// Orchestrator state, published on a watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EpochState {
    Idle,
    Checking,
    Fetching { completed: usize, total: usize },
    Writing,
    Notifying,
    Failed,
}

impl fmt::Display for EpochState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochState::Idle => f.write_str("IDLE"),
            EpochState::Checking => f.write_str("CHECKING"),
            EpochState::Fetching { completed, total } => write!(f, "FETCHING ({completed}/{total})"),
            EpochState::Writing => f.write_str("WRITING"),
            EpochState::Notifying => f.write_str("NOTIFYING"),
            EpochState::Failed => f.write_str("FAILED"),
        }
    }
}

/// Final classification of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochOutcome {
    /// Every changed kind was fully written and committed.
    Success,
    /// Some work landed but at least one kind stays on its old version.
    Partial,
    /// Nothing was committed, or a commit itself failed.
    Failure,
    /// Upstream versions match the committed ones.
    Unchanged,
}

impl EpochOutcome {
    /// Derives the outcome from the per-kind reports of an epoch that got past CHECKING.
    pub fn decide(kinds: &[KindReport]) -> EpochOutcome {
        if kinds.is_empty() {
            return EpochOutcome::Unchanged;
        }
        if kinds.iter().any(|k| k.commit_error.is_some()) {
            return EpochOutcome::Failure;
        }
        if kinds.iter().all(|k| k.committed) {
            return EpochOutcome::Success;
        }
        if kinds.iter().all(KindReport::all_targets_failed) {
            return EpochOutcome::Failure;
        }
        EpochOutcome::Partial
    }

    pub fn label(self) -> &'static str {
        match self {
            EpochOutcome::Success => "success",
            EpochOutcome::Partial => "partial",
            EpochOutcome::Failure => "failure",
            EpochOutcome::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for EpochOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of diffing one target against its baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "detail", rename_all = "snake_case")]
pub enum DiffOutcome {
    Known(DiffSummary),
    /// The payloads could not be compared. The write still happens.
    Unknown(String),
}

/// Per-target record of an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentReport {
    pub target: FetchTarget,
    /// Fetch attempts made, including the successful one.
    pub attempts: u32,
    /// Set when the fetch or the cache write failed terminally.
    pub error: Option<SyncError>,
    /// `None` when the target never reached the diff step.
    pub diff: Option<DiffOutcome>,
}

impl SegmentReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Per-kind record of an epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindReport {
    pub kind: DataKind,
    pub old_version: Option<Version>,
    pub new_version: Version,
    /// In processing order.
    pub segments: Vec<SegmentReport>,
    pub committed: bool,
    pub commit_error: Option<SyncError>,
}

impl KindReport {
    pub fn new(kind: DataKind, old_version: Option<Version>, new_version: Version) -> Self {
        Self {
            kind,
            old_version,
            new_version,
            segments: Vec::new(),
            committed: false,
            commit_error: None,
        }
    }

    pub fn failed_segments(&self) -> impl Iterator<Item = &SegmentReport> {
        self.segments.iter().filter(|s| !s.succeeded())
    }

    pub fn all_targets_failed(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(|s| !s.succeeded())
    }

    pub fn fully_written(&self) -> bool {
        !self.segments.is_empty() && self.segments.iter().all(SegmentReport::succeeded)
    }

    /// The committed version was refetched because its cache entries expired.
    pub fn restored(&self) -> bool {
        self.old_version.as_ref() == Some(&self.new_version)
    }
}

/// One synchronization run.
#[derive(Debug, Clone, Serialize)]
pub struct SyncEpoch {
    pub trigger: Trigger,
    pub trigger_time: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Kinds whose upstream version differed from the committed one, or whose
    /// committed version had to be restored in the cache.
    pub kinds: Vec<KindReport>,
    /// Union of every known per-target diff.
    pub diff_summary: DiffSummary,
    /// Targets whose diff could not be computed.
    pub unknown_changes: Vec<FetchTarget>,
    /// Failure that stopped the epoch before any kind was processed.
    pub error: Option<SyncError>,
    pub cancelled: bool,
    pub outcome: Option<EpochOutcome>,
}

impl SyncEpoch {
    pub fn start(trigger: Trigger) -> Self {
        Self {
            trigger,
            trigger_time: Utc::now(),
            finished_at: None,
            kinds: Vec::new(),
            diff_summary: DiffSummary::default(),
            unknown_changes: Vec::new(),
            error: None,
            cancelled: false,
            outcome: None,
        }
    }

    pub fn kind(&self, kind: DataKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }

    pub fn old_version(&self, kind: DataKind) -> Option<&Version> {
        self.kind(kind).and_then(|k| k.old_version.as_ref())
    }

    pub fn new_version(&self, kind: DataKind) -> Option<&Version> {
        self.kind(kind).map(|k| &k.new_version)
    }

    /// Targets written to the cache, in processing order.
    pub fn segments_processed(&self) -> Vec<FetchTarget> {
        self.kinds
            .iter()
            .flat_map(|k| k.segments.iter())
            .filter(|s| s.succeeded())
            .map(|s| s.target)
            .collect()
    }

    /// Targets that failed terminally, with the error that ended them.
    pub fn segments_failed(&self) -> Vec<(FetchTarget, &SyncError)> {
        self.kinds
            .iter()
            .flat_map(|k| k.segments.iter())
            .filter_map(|s| s.error.as_ref().map(|e| (s.target, e)))
            .collect()
    }

    /// Folds every per-target diff into the epoch summary.
    pub(crate) fn collect_diffs(&mut self) {
        let mut summary = DiffSummary::default();
        let mut unknown = Vec::new();
        for segment in self.kinds.iter().flat_map(|k| k.segments.iter()) {
            match &segment.diff {
                Some(DiffOutcome::Known(diff)) => summary.merge(diff),
                Some(DiffOutcome::Unknown(_)) => unknown.push(segment.target),
                None => {}
            }
        }
        self.diff_summary = summary;
        self.unknown_changes = unknown;
    }

    /// Sets the outcome once. Epoch-level errors and cancellation force `Failure`.
    pub(crate) fn finalize(&mut self) -> EpochOutcome {
        self.collect_diffs();
        let outcome = if self.error.is_some() || self.cancelled {
            EpochOutcome::Failure
        } else {
            EpochOutcome::decide(&self.kinds)
        };
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
        outcome
    }
}
