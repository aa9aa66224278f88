use futures_util::future::join_all;
use lib_datasync::SyncError;
use lib_datasync::connections::{CacheWriter, FileVersionStore, MemoryCache, VersionStore};
use lib_datasync::core::{EpochOutcome, NotificationDispatcher, SyncOrchestrator, Trigger};
use lib_datasync::model::{CacheKey, DataKind, Segment, Version};
use project_tests::{CountingCache, ScriptedUpstream, fast_policy, units};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_a_mixed_payload() {
    let cache = Arc::new(MemoryCache::new());
    let key = CacheKey::game_data(&Version::new("7"), Segment::Full);
    let generation = |n: u64| json!({ "generation": n, "units": vec![n; 64] });
    cache
        .write(&key, Arc::new(generation(0)), Duration::from_secs(60))
        .await
        .unwrap();

    let writer = {
        let cache = cache.clone();
        let key = key.clone();
        tokio::spawn(async move {
            for n in 1..=200u64 {
                cache
                    .write(&key, Arc::new(generation(n)), Duration::from_secs(60))
                    .await
                    .unwrap();
                tokio::task::yield_now().await;
            }
        })
    };

    let readers = (0..4).map(|_| {
        let cache = cache.clone();
        let key = key.clone();
        tokio::spawn(async move {
            let mut last_seen = 0;
            for _ in 0..500 {
                let entry = cache.read(&key).await.unwrap().unwrap();
                let generation = entry["generation"].as_u64().unwrap();
                let units = entry["units"].as_array().unwrap();
                assert!(units.iter().all(|u| u.as_u64() == Some(generation)));
                assert!(generation >= last_seen, "entry went back in time");
                last_seen = generation;
                tokio::task::yield_now().await;
            }
        })
    });

    for reader in join_all(readers).await {
        reader.unwrap();
    }
    writer.await.unwrap();
}

#[tokio::test]
async fn file_store_keeps_kinds_independent_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("versions.json");

    let store = FileVersionStore::new(&path);
    let cold = store.get_current().await.unwrap();
    assert_eq!(cold.game_data, None);
    assert_eq!(cold.localization, None);

    store.commit(DataKind::GameData, &Version::new("7")).await.unwrap();
    store
        .commit(DataKind::Localization, &Version::new("loc-2"))
        .await
        .unwrap();
    store.commit(DataKind::GameData, &Version::new("8")).await.unwrap();

    let reopened = FileVersionStore::new(&path).get_current().await.unwrap();
    assert_eq!(reopened.game_data, Some(Version::new("8")));
    assert_eq!(reopened.localization, Some(Version::new("loc-2")));

    // No temp files are left next to the store.
    let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[tokio::test]
async fn corrupt_version_file_is_a_persistence_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("versions.json");
    std::fs::write(&path, "{ half written").unwrap();

    let result = FileVersionStore::new(&path).get_current().await;
    assert!(matches!(result, Err(SyncError::PersistenceError(_))));
}

#[tokio::test]
async fn committed_versions_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("versions.json");
    let upstream = Arc::new(ScriptedUpstream::new());
    upstream.advertise("7", "loc-1");
    upstream.publish_game_data("7", units(&[("VADER", 100)]));
    upstream.publish_localization("loc-1", json!({ "Loc_ENG_US.txt": "A" }));
    let cache = Arc::new(CountingCache::new());

    let start = |cache: Arc<CountingCache>| {
        let (emitter, dispatcher) = NotificationDispatcher::new(Vec::new());
        let orchestrator = SyncOrchestrator::new(
            upstream.clone(),
            cache,
            Arc::new(FileVersionStore::new(&path)),
            emitter,
            fast_policy(),
        );
        (orchestrator, dispatcher)
    };

    let (first_run, _dispatcher) = start(cache.clone());
    let epoch = first_run
        .run_epoch(Trigger::Startup, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(epoch.outcome, Some(EpochOutcome::Success));
    drop(first_run);

    let (second_run, _dispatcher) = start(cache.clone());
    let epoch = second_run
        .run_epoch(Trigger::Startup, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(epoch.outcome, Some(EpochOutcome::Unchanged));
    assert_eq!(cache.writes(), 6);
}

#[tokio::test]
async fn committed_version_is_fully_readable() {
    let upstream = Arc::new(ScriptedUpstream::new());
    upstream.advertise("3", "loc-1");
    upstream.publish_game_data("3", units(&[("REY", 120)]));
    upstream.publish_localization("loc-1", json!({ "Loc_ENG_US.txt": "A" }));
    let cache = Arc::new(CountingCache::new());
    let versions = Arc::new(lib_datasync::connections::MemoryVersionStore::new());
    let (emitter, _dispatcher) = NotificationDispatcher::new(Vec::new());
    let orchestrator = SyncOrchestrator::new(
        upstream,
        cache.clone(),
        versions.clone(),
        emitter,
        fast_policy(),
    );

    orchestrator
        .run_epoch(Trigger::Startup, CancellationToken::new())
        .await
        .unwrap();

    let current = versions.get_current().await.unwrap();
    let game_data = current.game_data.unwrap();
    for segment in Segment::ALL {
        let key = CacheKey::game_data(&game_data, segment);
        assert!(cache.contains(&key).await, "{key} missing for committed version");
    }
    let localization = current.localization.unwrap();
    assert!(cache.contains(&CacheKey::localization(&localization)).await);
    assert_eq!(
        cache.written_keys().first().map(String::as_str),
        Some("gamedata:3:0")
    );
}
