use lib_datasync::SyncError;
use lib_datasync::core::{Lookup, PlayerService, Trigger};
use lib_datasync::model::{AllyCode, CacheKey};
use project_tests::{CountingCache, Harness, ScriptedUpstream, fast_policy};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn service() -> (PlayerService, Arc<ScriptedUpstream>, Arc<CountingCache>) {
    let upstream = Arc::new(ScriptedUpstream::new());
    upstream.add_player("123456789", json!({ "allyCode": "123456789", "name": "Rey" }));
    let cache = Arc::new(CountingCache::new());
    let service = PlayerService::new(upstream.clone(), cache.clone());
    (service, upstream, cache)
}

#[tokio::test]
async fn second_lookup_is_served_from_the_cache() {
    let (service, upstream, cache) = service();

    let (record, lookup) = service.get_player("123-456-789").await.unwrap();
    assert_eq!(lookup, Lookup::Miss);
    assert_eq!(record["name"], "Rey");

    let (again, lookup) = service.get_player("123456789").await.unwrap();
    assert_eq!(lookup, Lookup::Hit);
    assert_eq!(again, record);
    assert_eq!(upstream.player_calls(), 1);

    let key = CacheKey::player(&AllyCode::parse("123456789").unwrap());
    assert_eq!(cache.written_keys(), vec![key.as_str().to_string()]);
}

#[tokio::test]
async fn malformed_ally_code_never_reaches_upstream() {
    let (service, upstream, cache) = service();

    let result = service.get_player("12345678X").await;
    assert!(matches!(result, Err(SyncError::InvalidAllyCode(_))));
    assert_eq!(upstream.player_calls(), 0);
    assert_eq!(cache.reads(), 0);
}

#[tokio::test]
async fn unknown_player_is_not_cached() {
    let (service, upstream, cache) = service();

    let result = service.get_player("987654321").await;
    assert!(matches!(result, Err(SyncError::UpstreamError { status: 404, .. })));
    assert_eq!(cache.writes(), 0);

    // A later lookup asks upstream again.
    let _ = service.get_player("987654321").await;
    assert_eq!(upstream.player_calls(), 2);
}

#[tokio::test]
async fn failed_cache_write_still_returns_the_record() {
    let (service, _upstream, cache) = service();
    cache.refuse(&CacheKey::player(&AllyCode::parse("123456789").unwrap()));

    let (record, lookup) = service.get_player("123456789").await.unwrap();
    assert_eq!(lookup, Lookup::Miss);
    assert_eq!(record["allyCode"], "123456789");
}

#[tokio::test]
async fn lookups_run_while_an_epoch_is_in_flight() {
    let harness = Harness::new(fast_policy());
    harness.upstream.delay_metadata(Duration::from_millis(400));
    harness
        .upstream
        .add_player("111222333", json!({ "allyCode": "111222333", "name": "Finn" }));
    let players = PlayerService::new(harness.upstream.clone(), harness.cache.clone());

    let orchestrator = harness.orchestrator.clone();
    let epoch = tokio::spawn(async move {
        orchestrator
            .run_epoch(Trigger::Scheduled, CancellationToken::new())
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.orchestrator.is_running());

    let started = tokio::time::Instant::now();
    let (record, _) = players.get_player("111-222-333").await.unwrap();
    assert_eq!(record["name"], "Finn");
    assert!(started.elapsed() < Duration::from_millis(300));

    epoch.await.unwrap().unwrap();
}
