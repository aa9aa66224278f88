use async_trait::async_trait;
use lib_datasync::configs::NotifySettings;
use lib_datasync::connections::MemoryVersionStore;
use lib_datasync::core::{
    EpochOutcome, NotificationDispatcher, NotificationSink, SyncEvent, SyncOrchestrator, Trigger,
};
use lib_datasync::retrieve::WebhookSink;
use lib_datasync::{Result, SyncError};
use project_tests::{CountingCache, RecordingSink, ScriptedUpstream, fast_policy, units};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Rejects every event.
#[derive(Default)]
struct BrokenSink {
    attempts: AtomicUsize,
}

#[async_trait]
impl NotificationSink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn deliver(&self, _event: &SyncEvent) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SyncError::UpstreamUnreachable("webhook down".into()))
    }
}

#[tokio::test]
async fn failing_sink_neither_blocks_others_nor_the_epoch() {
    let upstream = Arc::new(ScriptedUpstream::new());
    upstream.advertise("1", "loc-1");
    upstream.publish_game_data("1", units(&[("VADER", 100)]));
    upstream.publish_localization("loc-1", json!({ "Loc_ENG_US.txt": "A" }));

    let broken = Arc::new(BrokenSink::default());
    let recording = Arc::new(RecordingSink::default());
    // A webhook sink without URL only logs a warning.
    let webhook = Arc::new(WebhookSink::new(&NotifySettings::default(), Duration::from_secs(1)).unwrap());
    let (emitter, dispatcher) = NotificationDispatcher::new(vec![
        broken.clone() as Arc<dyn NotificationSink>,
        webhook as Arc<dyn NotificationSink>,
        recording.clone() as Arc<dyn NotificationSink>,
    ]);
    let orchestrator = SyncOrchestrator::new(
        upstream,
        Arc::new(CountingCache::new()),
        Arc::new(MemoryVersionStore::new()),
        emitter,
        fast_policy(),
    );
    let delivery = tokio::spawn(dispatcher.run());

    let first = orchestrator
        .run_epoch(Trigger::Startup, CancellationToken::new())
        .await
        .unwrap();
    let second = orchestrator
        .run_epoch(Trigger::Scheduled, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.outcome, Some(EpochOutcome::Success));
    assert_eq!(second.outcome, Some(EpochOutcome::Unchanged));

    // Dropping the orchestrator drops the emitter and ends the dispatcher.
    drop(orchestrator);
    tokio::time::timeout(Duration::from_secs(5), delivery)
        .await
        .unwrap()
        .unwrap();

    // Delivery is attempted once per event, never retried.
    assert_eq!(broken.attempts.load(Ordering::SeqCst), 2);
    let events = recording.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].outcome, EpochOutcome::Success);
    assert_eq!(events[1].outcome, EpochOutcome::Unchanged);
}
