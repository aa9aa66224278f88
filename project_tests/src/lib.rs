//! In-process fakes for driving `lib_datasync` end to end.
//!
//! - [`ScriptedUpstream`]: a content service with per-version releases, scripted
//!   failures and delays.
//! - [`CountingCache`]: a `MemoryCache` that counts calls and can refuse writes.
//! - [`FlakyVersionStore`]: a `MemoryVersionStore` whose commits can be made to fail.
//! - [`RecordingSink`]: keeps every delivered event.
//! - [`Harness`]: all of the above wired to one orchestrator.

use async_trait::async_trait;
use lib_datasync::configs::{RetrySettings, SyncPolicy};
use lib_datasync::connections::{CacheWriter, MemoryCache, MemoryVersionStore, VersionStore};
use lib_datasync::core::{
    NotificationDispatcher, NotificationSink, PlayerSource, SegmentFetcher, SyncEvent,
    SyncOrchestrator,
};
use lib_datasync::model::{
    AllyCode, CacheKey, DataKind, FetchTarget, Metadata, Payload, Segment, StoredVersions, Version,
};
use lib_datasync::{Result, SyncError};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A game-data payload as upstream returns it for `segment`: every top-level key
/// present, keys outside the segment empty, `units` filled where the segment owns it.
pub fn segment_payload(segment: Segment, units: &Value) -> Payload {
    let mut payload = Map::new();
    for key in Segment::Full.owned_keys() {
        payload.insert(key.to_string(), json!([]));
    }
    if segment.owns("units") {
        payload.insert("units".to_string(), units.clone());
    }
    Value::Object(payload)
}

/// `[{"id": .., "power": ..}]` unit list.
pub fn units(entries: &[(&str, u64)]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|(id, power)| json!({ "id": id, "power": power }))
            .collect(),
    )
}

#[derive(Default)]
struct UpstreamScript {
    metadata: Option<Metadata>,
    releases: HashMap<Version, Value>,
    bundles: HashMap<Version, Payload>,
    failures: HashMap<FetchTarget, VecDeque<SyncError>>,
    always_fail: HashMap<FetchTarget, SyncError>,
    delays: HashMap<FetchTarget, Duration>,
    calls: HashMap<FetchTarget, usize>,
    players: HashMap<String, Payload>,
}

/// Scripted content service.
#[derive(Default)]
pub struct ScriptedUpstream {
    script: Mutex<UpstreamScript>,
    metadata_calls: AtomicUsize,
    metadata_delay: Mutex<Duration>,
    player_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Tracks one fetch in flight for the peak counter.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the versions the metadata endpoint advertises.
    pub fn advertise(&self, game_data: &str, localization: &str) {
        self.lock().metadata = Some(Metadata {
            latest_gamedata_version: Version::new(game_data),
            latest_localization_bundle_version: Version::new(localization),
        });
    }

    /// Publishes the unit list of game-data `version`.
    pub fn publish_game_data(&self, version: &str, units: Value) {
        self.lock().releases.insert(Version::new(version), units);
    }

    pub fn publish_localization(&self, version: &str, bundle: Payload) {
        self.lock().bundles.insert(Version::new(version), bundle);
    }

    pub fn add_player(&self, ally_code: &str, record: Payload) {
        self.lock().players.insert(ally_code.to_string(), record);
    }

    /// The next calls for `target` fail with `errors`, in order.
    pub fn fail_next(&self, target: FetchTarget, errors: Vec<SyncError>) {
        self.lock().failures.entry(target).or_default().extend(errors);
    }

    /// Every call for `target` fails with `error`.
    pub fn fail_always(&self, target: FetchTarget, error: SyncError) {
        self.lock().always_fail.insert(target, error);
    }

    pub fn heal(&self, target: FetchTarget) {
        let mut script = self.lock();
        script.always_fail.remove(&target);
        script.failures.remove(&target);
    }

    pub fn delay(&self, target: FetchTarget, delay: Duration) {
        self.lock().delays.insert(target, delay);
    }

    pub fn delay_metadata(&self, delay: Duration) {
        if let Ok(mut current) = self.metadata_delay.lock() {
            *current = delay;
        }
    }

    pub fn calls(&self, target: FetchTarget) -> usize {
        self.lock().calls.get(&target).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.lock().calls.values().sum()
    }

    pub fn metadata_calls(&self) -> usize {
        self.metadata_calls.load(Ordering::SeqCst)
    }

    pub fn player_calls(&self) -> usize {
        self.player_calls.load(Ordering::SeqCst)
    }

    /// Most content fetches observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, UpstreamScript> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records the call and returns the scripted error and delay for `target`.
    fn begin(&self, target: FetchTarget) -> (Option<SyncError>, Duration) {
        let mut script = self.lock();
        *script.calls.entry(target).or_default() += 1;
        let always = script.always_fail.get(&target).cloned();
        let error = always.or_else(|| script.failures.get_mut(&target).and_then(VecDeque::pop_front));
        let delay = script.delays.get(&target).copied().unwrap_or_default();
        (error, delay)
    }
}

#[async_trait]
impl SegmentFetcher for ScriptedUpstream {
    async fn fetch_metadata(&self) -> Result<Metadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .metadata_delay
            .lock()
            .map(|d| *d)
            .unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.lock().metadata.clone().ok_or(SyncError::UpstreamError {
            status: 503,
            body: "no metadata published".into(),
        })
    }

    async fn fetch_segment(&self, version: &Version, segment: Segment) -> Result<Payload> {
        let _in_flight = self.enter();
        let (error, delay) = self.begin(FetchTarget::GameData(segment));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = error {
            return Err(e);
        }
        let units = self.lock().releases.get(version).cloned();
        match units {
            Some(units) => Ok(segment_payload(segment, &units)),
            None => Err(SyncError::UpstreamError {
                status: 404,
                body: format!("unknown version {version}"),
            }),
        }
    }

    async fn fetch_localization(&self, version: &Version, _unzip: bool) -> Result<Payload> {
        let _in_flight = self.enter();
        let (error, delay) = self.begin(FetchTarget::Localization);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = error {
            return Err(e);
        }
        self.lock()
            .bundles
            .get(version)
            .cloned()
            .ok_or_else(|| SyncError::UpstreamError {
                status: 404,
                body: format!("unknown bundle {version}"),
            })
    }
}

#[async_trait]
impl PlayerSource for ScriptedUpstream {
    async fn fetch_player(&self, ally_code: &AllyCode) -> Result<Payload> {
        self.player_calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .players
            .get(ally_code.as_str())
            .cloned()
            .ok_or_else(|| SyncError::UpstreamError {
                status: 404,
                body: "player not found".into(),
            })
    }
}

/// `MemoryCache` with call counters and refusable keys.
#[derive(Default)]
pub struct CountingCache {
    inner: MemoryCache,
    writes: AtomicUsize,
    reads: AtomicUsize,
    invalidations: AtomicUsize,
    written_keys: Mutex<Vec<String>>,
    refused: Mutex<HashSet<String>>,
}

impl CountingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::SeqCst)
    }

    pub fn written_keys(&self) -> Vec<String> {
        self.written_keys
            .lock()
            .map(|keys| keys.clone())
            .unwrap_or_default()
    }

    /// Writes to `key` fail from now on.
    pub fn refuse(&self, key: &CacheKey) {
        if let Ok(mut refused) = self.refused.lock() {
            refused.insert(key.as_str().to_string());
        }
    }

    /// Stores an entry without touching the counters.
    pub async fn seed(&self, key: &CacheKey, payload: Payload) {
        let _ = self
            .inner
            .write(key, Arc::new(payload), Duration::from_secs(3600))
            .await;
    }

    /// Reads straight from the backing cache without touching the counters.
    pub async fn peek(&self, key: &CacheKey) -> Option<Arc<Payload>> {
        self.inner.read(key).await.ok().flatten()
    }

    pub async fn contains(&self, key: &CacheKey) -> bool {
        self.peek(key).await.is_some()
    }
}

#[async_trait]
impl CacheWriter for CountingCache {
    async fn write(&self, key: &CacheKey, payload: Arc<Payload>, ttl: Duration) -> Result<()> {
        let refused = self
            .refused
            .lock()
            .map(|r| r.contains(key.as_str()))
            .unwrap_or(false);
        if refused {
            return Err(SyncError::CacheWriteError(format!("{key} refused")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut keys) = self.written_keys.lock() {
            keys.push(key.as_str().to_string());
        }
        self.inner.write(key, payload, ttl).await
    }

    async fn read(&self, key: &CacheKey) -> Result<Option<Arc<Payload>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read(key).await
    }

    async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
        self.inner.invalidate(key).await
    }

    async fn exists(&self, key: &CacheKey) -> Result<bool> {
        self.inner.exists(key).await
    }
}

/// `MemoryVersionStore` whose commits fail while `failing` is set.
#[derive(Default)]
pub struct FlakyVersionStore {
    inner: MemoryVersionStore,
    failing: AtomicBool,
    commits: AtomicUsize,
}

impl FlakyVersionStore {
    pub fn with_versions(versions: StoredVersions) -> Self {
        Self {
            inner: MemoryVersionStore::with_versions(versions),
            ..Default::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VersionStore for FlakyVersionStore {
    async fn get_current(&self) -> Result<StoredVersions> {
        self.inner.get_current().await
    }

    async fn commit(&self, kind: DataKind, version: &Version) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SyncError::PersistenceError("version store offline".into()));
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.inner.commit(kind, version).await
    }
}

/// Keeps delivered events in order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SyncEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &SyncEvent) -> Result<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}

/// Policy with short delays so retry paths run quickly.
pub fn fast_policy() -> SyncPolicy {
    SyncPolicy {
        retry: RetrySettings {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
        },
        fetch_timeout: Duration::from_secs(2),
        io_timeout: Duration::from_secs(2),
        ..SyncPolicy::default()
    }
}

/// An orchestrator over the fakes, with its dispatcher held for manual draining.
pub struct Harness {
    pub upstream: Arc<ScriptedUpstream>,
    pub cache: Arc<CountingCache>,
    pub versions: Arc<FlakyVersionStore>,
    pub sink: Arc<RecordingSink>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub dispatcher: NotificationDispatcher,
}

impl Harness {
    pub fn new(policy: SyncPolicy) -> Self {
        Self::with_versions(policy, StoredVersions::default())
    }

    pub fn with_versions(policy: SyncPolicy, stored: StoredVersions) -> Self {
        let upstream = Arc::new(ScriptedUpstream::new());
        let cache = Arc::new(CountingCache::new());
        let versions = Arc::new(FlakyVersionStore::with_versions(stored));
        let sink = Arc::new(RecordingSink::default());
        let (emitter, dispatcher) =
            NotificationDispatcher::new(vec![sink.clone() as Arc<dyn NotificationSink>]);
        let orchestrator = Arc::new(SyncOrchestrator::new(
            upstream.clone(),
            cache.clone(),
            versions.clone(),
            emitter,
            policy,
        ));
        Self {
            upstream,
            cache,
            versions,
            sink,
            orchestrator,
            dispatcher,
        }
    }

    /// Caches every segment of game-data `version` as if it had been synced.
    pub async fn cache_release(&self, version: &str, units: &Value) {
        for segment in Segment::ALL {
            self.cache
                .seed(
                    &CacheKey::game_data(&Version::new(version), segment),
                    segment_payload(segment, units),
                )
                .await;
        }
    }

    pub async fn cache_bundle(&self, version: &str, bundle: Payload) {
        self.cache
            .seed(&CacheKey::localization(&Version::new(version)), bundle)
            .await;
    }

    /// Delivers queued events and returns everything the sink has seen.
    pub async fn events(&mut self) -> Vec<SyncEvent> {
        self.dispatcher.dispatch_pending().await;
        self.sink.events()
    }
}

/// Committed versions for a warm start.
pub fn stored(game_data: &str, localization: &str) -> StoredVersions {
    StoredVersions {
        game_data: Some(Version::new(game_data)),
        localization: Some(Version::new(localization)),
    }
}
