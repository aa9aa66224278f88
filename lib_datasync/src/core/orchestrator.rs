//! # Sync Orchestrator
//!
//! Drives one epoch at a time through
//! `IDLE -> CHECKING -> FETCHING -> WRITING -> NOTIFYING -> IDLE`, with `FAILED`
//! entered from the first three when the epoch cannot succeed.
//!
//! ## Guarantees
//! - At most one epoch runs; a concurrent trigger gets [`SyncError::EpochInFlight`].
//! - A kind's version is committed only after every target of that kind was
//!   fetched and written for the new version.
//! - A committed version whose entries expired from the cache is refetched
//!   under the same version, so a committed version stays readable.
//! - Every epoch that starts emits exactly one event, whatever its outcome.
//! - Targets are reported in processing order (FULL, PARTIAL_1..4, localization)
//!   even though fetches overlap.

use futures_util::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::configs::{SegmentPolicy, SyncPolicy};
use crate::connections::{CacheWriter, VersionStore};
use crate::core::diff::{diff, diff_bundle, DiffSummary};
use crate::core::dispatcher::{EventEmitter, SyncEvent};
use crate::core::epoch::{
    DiffOutcome, EpochOutcome, EpochState, KindReport, SegmentReport, SyncEpoch, Trigger,
};
use crate::core::source::SegmentFetcher;
use crate::errors::{Result, SyncError};
use crate::model::{DataKind, FetchTarget, Metadata, Payload, Segment, StoredVersions, Version};

/// One fetched slot, in processing order.
struct Fetched {
    target: FetchTarget,
    attempts: u32,
    payload: Result<Payload>,
}

pub struct SyncOrchestrator {
    fetcher: Arc<dyn SegmentFetcher>,
    cache: Arc<dyn CacheWriter>,
    versions: Arc<dyn VersionStore>,
    emitter: EventEmitter,
    policy: SyncPolicy,
    in_flight: Mutex<()>,
    state: watch::Sender<EpochState>,
    last_epoch: RwLock<Option<Arc<SyncEpoch>>>,
}

impl SyncOrchestrator {
    pub fn new(
        fetcher: Arc<dyn SegmentFetcher>,
        cache: Arc<dyn CacheWriter>,
        versions: Arc<dyn VersionStore>,
        emitter: EventEmitter,
        policy: SyncPolicy,
    ) -> Self {
        let (state, _) = watch::channel(EpochState::Idle);
        Self {
            fetcher,
            cache,
            versions,
            emitter,
            policy,
            in_flight: Mutex::new(()),
            state,
            last_epoch: RwLock::new(None),
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<EpochState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> EpochState {
        self.state.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// The most recently finished epoch.
    pub async fn last_epoch(&self) -> Option<Arc<SyncEpoch>> {
        self.last_epoch.read().await.clone()
    }

    /// Runs one epoch to completion.
    ///
    /// Returns [`SyncError::EpochInFlight`] without side effects when another epoch
    /// holds the orchestrator. Every other failure is recorded in the returned epoch.
    pub async fn run_epoch(&self, trigger: Trigger, cancel: CancellationToken) -> Result<Arc<SyncEpoch>> {
        let _guard = self.in_flight.try_lock().map_err(|_| {
            warn!(?trigger, "Sync trigger rejected: an epoch is already in flight");
            SyncError::EpochInFlight
        })?;

        let mut epoch = SyncEpoch::start(trigger);
        info!(?trigger, "Sync epoch started");
        self.execute(&mut epoch, &cancel).await;

        let outcome = epoch.finalize();
        if epoch.cancelled {
            warn!("Sync epoch cancelled");
        }
        if outcome == EpochOutcome::Failure {
            self.set_state(EpochState::Failed);
        }

        self.set_state(EpochState::Notifying);
        self.emitter.emit(SyncEvent::from_epoch(&epoch));

        let epoch = Arc::new(epoch);
        *self.last_epoch.write().await = Some(Arc::clone(&epoch));
        info!(
            %outcome,
            processed = epoch.segments_processed().len(),
            failed = epoch.segments_failed().len(),
            changed = epoch.diff_summary.total(),
            "Sync epoch finished"
        );
        self.set_state(EpochState::Idle);
        Ok(epoch)
    }

    async fn execute(&self, epoch: &mut SyncEpoch, cancel: &CancellationToken) {
        self.set_state(EpochState::Checking);
        let (metadata, stored) = match self.check(cancel).await {
            Ok(found) => found,
            Err(SyncError::Cancelled) => {
                epoch.cancelled = true;
                return;
            }
            Err(e) => {
                error!(error_class = e.class(), "Version check failed: {e}");
                epoch.error = Some(e);
                return;
            }
        };

        let mut targets = Vec::new();
        for kind in [DataKind::GameData, DataKind::Localization] {
            let latest = metadata.latest(kind);
            let current = stored.get(kind);
            let kind_targets = if current == Some(latest) {
                let missing = self.missing_targets(kind, latest).await;
                if missing.is_empty() {
                    debug!(%kind, version = %latest, "Version unchanged");
                    continue;
                }
                warn!(
                    %kind,
                    version = %latest,
                    missing = missing.len(),
                    "Committed version is no longer fully cached, refetching"
                );
                missing
            } else {
                info!(
                    %kind,
                    old = current.map_or("none", Version::as_str),
                    new = %latest,
                    "Version changed"
                );
                self.targets_of(kind)
            };
            targets.extend(kind_targets.into_iter().map(|t| (t, latest.clone())));
            epoch
                .kinds
                .push(KindReport::new(kind, current.cloned(), latest.clone()));
        }
        if epoch.kinds.is_empty() {
            info!("Upstream versions match the committed ones");
            return;
        }

        let mut fetched = self.fetch_all(targets, cancel).await;
        if cancel.is_cancelled() {
            epoch.cancelled = true;
        }

        self.set_state(EpochState::Writing);
        for report in &mut epoch.kinds {
            let kind = report.kind;
            let (slots, rest): (Vec<_>, Vec<_>) =
                fetched.into_iter().partition(|f| f.target.kind() == kind);
            fetched = rest;
            for slot in slots {
                let segment = self.write_target(report, slot, cancel).await;
                report.segments.push(segment);
            }
            self.commit_kind(report, cancel).await;
        }
    }

    /// CHECKING: upstream metadata and committed versions.
    async fn check(&self, cancel: &CancellationToken) -> Result<(Metadata, StoredVersions)> {
        let (_, metadata) = self
            .with_retry("metadata", cancel, || self.fetcher.fetch_metadata())
            .await;
        let metadata = metadata?;
        let stored = self
            .with_io_timeout("read versions", self.versions.get_current(), |msg| {
                SyncError::PersistenceError(msg)
            })
            .await?;
        Ok((metadata, stored))
    }

    /// Targets of `kind`, in processing order.
    fn targets_of(&self, kind: DataKind) -> Vec<FetchTarget> {
        match kind {
            DataKind::GameData => {
                let segments: &[Segment] = match self.policy.segment_policy {
                    SegmentPolicy::AllSegments => &Segment::ALL,
                    SegmentPolicy::FullOnly => &[Segment::Full],
                };
                segments.iter().map(|s| FetchTarget::GameData(*s)).collect()
            }
            DataKind::Localization => vec![FetchTarget::Localization],
        }
    }

    /// Targets of a committed `version` whose cache entries are gone.
    ///
    /// A target that cannot be checked counts as present; the next epoch checks again.
    async fn missing_targets(&self, kind: DataKind, version: &Version) -> Vec<FetchTarget> {
        let mut missing = Vec::new();
        for target in self.targets_of(kind) {
            let key = target.cache_key(version);
            let found = self
                .with_io_timeout("cache exists", self.cache.exists(&key), |msg| {
                    SyncError::CacheReadError(msg)
                })
                .await;
            match found {
                Ok(true) => {}
                Ok(false) => missing.push(target),
                Err(e) => warn!(%key, error_class = e.class(), "Could not verify cached entry: {e}"),
            }
        }
        missing
    }

    /// FETCHING: up to `max_concurrent_fetches` targets at once, one result slot per target.
    async fn fetch_all(&self, targets: Vec<(FetchTarget, Version)>, cancel: &CancellationToken) -> Vec<Fetched> {
        let total = targets.len();
        let completed = AtomicUsize::new(0);
        self.set_state(EpochState::Fetching { completed: 0, total });

        stream::iter(targets.into_iter().map(|(target, version)| {
            let completed = &completed;
            async move {
                let (attempts, payload) = self
                    .with_retry(&target.to_string(), cancel, || self.fetch_once(target, &version))
                    .await;
                match &payload {
                    Ok(_) => debug!(%target, %version, attempts, "Fetched"),
                    Err(SyncError::Cancelled) => {}
                    Err(e) => warn!(%target, %version, attempts, error_class = e.class(), "Fetch failed: {e}"),
                }
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                self.state.send_replace(EpochState::Fetching { completed: done, total });
                Fetched {
                    target,
                    attempts,
                    payload,
                }
            }
        }))
        .buffered(self.policy.max_concurrent_fetches.max(1))
        .collect()
        .await
    }

    async fn fetch_once(&self, target: FetchTarget, version: &Version) -> Result<Payload> {
        match target {
            FetchTarget::GameData(segment) => self.fetcher.fetch_segment(version, segment).await,
            FetchTarget::Localization => {
                self.fetcher
                    .fetch_localization(version, self.policy.localization_unzip)
                    .await
            }
        }
    }

    /// Calls `call` until it succeeds, fails terminally or runs out of attempts.
    ///
    /// Each attempt is bounded by `fetch_timeout`. Only transient errors are retried.
    async fn with_retry<T, F, Fut>(&self, what: &str, cancel: &CancellationToken, mut call: F) -> (u32, Result<T>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let retry = self.policy.retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return (attempt, Err(SyncError::Cancelled)),
                outcome = tokio::time::timeout(self.policy.fetch_timeout, call()) => match outcome {
                    Ok(result) => result,
                    Err(_) => Err(SyncError::UpstreamTimeout(format!(
                        "{what} exceeded {}s",
                        self.policy.fetch_timeout.as_secs_f32()
                    ))),
                },
            };
            match result {
                Err(e) if e.is_transient() && attempt < retry.max_attempts => {
                    let delay = retry.delay_for(attempt);
                    warn!(what, attempt, delay_ms = delay.as_millis() as u64, "Transient upstream failure, retrying: {e}");
                    tokio::select! {
                        _ = cancel.cancelled() => return (attempt, Err(SyncError::Cancelled)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return (attempt, other),
            }
        }
    }

    /// WRITING for one slot: diff against the previous version's entry, then write.
    ///
    /// Restored entries of an unchanged version are written without a diff.
    async fn write_target(&self, report: &KindReport, slot: Fetched, cancel: &CancellationToken) -> SegmentReport {
        let Fetched {
            target,
            attempts,
            payload,
        } = slot;
        let mut segment = SegmentReport {
            target,
            attempts,
            error: None,
            diff: None,
        };
        let payload = match payload {
            Ok(payload) => Arc::new(payload),
            Err(e) => {
                segment.error = Some(e);
                return segment;
            }
        };
        if cancel.is_cancelled() {
            segment.error = Some(SyncError::Cancelled);
            return segment;
        }

        if report.restored() {
            debug!(%target, version = %report.new_version, "Restoring expired entry");
        } else {
            segment.diff = Some(self.diff_target(target, report.old_version.as_ref(), &payload).await);
        }

        let key = target.cache_key(&report.new_version);
        let ttl = self.ttl_for(target.kind());
        let write = self
            .with_io_timeout("cache write", self.cache.write(&key, payload, ttl), |msg| {
                SyncError::CacheWriteError(msg)
            })
            .await;
        match write {
            Ok(()) => debug!(%key, ttl_secs = ttl.as_secs(), "Cache entry written"),
            Err(e) => {
                error!(%key, error_class = e.class(), "Cache write failed: {e}");
                segment.error = Some(e);
            }
        }
        segment
    }

    async fn diff_target(&self, target: FetchTarget, old_version: Option<&Version>, new: &Arc<Payload>) -> DiffOutcome {
        let baseline = match old_version {
            None => None,
            Some(old) => {
                let key = target.cache_key(old);
                let read = self
                    .with_io_timeout("cache read", self.cache.read(&key), |msg| {
                        SyncError::CacheReadError(msg)
                    })
                    .await;
                match read {
                    Ok(entry) => {
                        if entry.is_none() {
                            debug!(%key, "No baseline cached, treating every entity as added");
                        }
                        entry
                    }
                    Err(e) => {
                        warn!(%key, "Baseline unavailable, changes unknown: {e}");
                        return DiffOutcome::Unknown(e.to_string());
                    }
                }
            }
        };

        let new = Arc::clone(new);
        let computed = tokio::task::spawn_blocking(move || -> Result<DiffSummary> {
            match target {
                FetchTarget::GameData(segment) => diff(baseline.as_deref(), &new, segment),
                FetchTarget::Localization => diff_bundle(baseline.as_deref(), &new),
            }
        })
        .await;
        match computed {
            Ok(Ok(summary)) => {
                debug!(%target, added = summary.added.len(), removed = summary.removed.len(), changed = summary.changed.len(), "Diff computed");
                DiffOutcome::Known(summary)
            }
            Ok(Err(e)) => {
                warn!(%target, "Diff skipped, changes unknown: {e}");
                DiffOutcome::Unknown(e.to_string())
            }
            Err(e) => DiffOutcome::Unknown(format!("diff task failed: {e}")),
        }
    }

    /// Commits the kind when every target landed, then expires the previous version's entries.
    async fn commit_kind(&self, report: &mut KindReport, cancel: &CancellationToken) {
        if !report.fully_written() {
            warn!(
                kind = %report.kind,
                failed = report.failed_segments().count(),
                "Not committing: some targets failed"
            );
            return;
        }
        if cancel.is_cancelled() {
            warn!(kind = %report.kind, "Not committing: epoch cancelled");
            return;
        }

        let commit = self
            .with_io_timeout(
                "version commit",
                self.versions.commit(report.kind, &report.new_version),
                SyncError::PersistenceError,
            )
            .await;
        if let Err(e) = commit {
            error!(kind = %report.kind, version = %report.new_version, "Version commit failed: {e}");
            report.commit_error = Some(e);
            return;
        }
        report.committed = true;
        info!(kind = %report.kind, version = %report.new_version, "Version committed");

        if let Some(old) = report.old_version.clone().filter(|old| *old != report.new_version) {
            for segment in &report.segments {
                let key = segment.target.cache_key(&old);
                let expire = self
                    .with_io_timeout("cache invalidate", self.cache.invalidate(&key), |msg| {
                        SyncError::CacheWriteError(msg)
                    })
                    .await;
                if let Err(e) = expire {
                    warn!(%key, "Could not expire previous version entry: {e}");
                }
            }
        }
    }

    async fn with_io_timeout<T, Fut>(&self, what: &str, call: Fut, on_timeout: impl FnOnce(String) -> SyncError) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.policy.io_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout(format!("{what} exceeded {}s", limit.as_secs_f32()))),
        }
    }

    fn ttl_for(&self, kind: DataKind) -> Duration {
        match kind {
            DataKind::GameData => self.policy.game_data_ttl,
            DataKind::Localization => self.policy.localization_ttl,
        }
    }

    fn set_state(&self, next: EpochState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            debug!(from = %previous, to = %next, "State transition");
        }
    }
}
