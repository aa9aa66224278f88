//! # Notification Dispatcher
//!
//! Epoch results leave the orchestrator as [`SyncEvent`]s. The orchestrator only
//! holds an [`EventEmitter`]; emitting is a non-blocking channel send, so a slow
//! or broken transport can never stall or fail an epoch.
//!
//! The [`NotificationDispatcher`] owns the receiving half and fans each event out
//! to every registered [`NotificationSink`]. Events are wrapped in an `Arc` once
//! and shared by all sinks. Delivery is best-effort: a sink error is logged and
//! the event is not retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::epoch::{EpochOutcome, SyncEpoch};
use crate::errors::Result;
use crate::model::DataKind;

/// How an event should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Success,
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn for_outcome(outcome: EpochOutcome) -> Self {
        match outcome {
            EpochOutcome::Success => Severity::Success,
            EpochOutcome::Partial => Severity::Warning,
            EpochOutcome::Failure => Severity::Error,
            EpochOutcome::Unchanged => Severity::Info,
        }
    }
}

/// A named block of event detail, rendered as an embed field by the webhook sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventField {
    pub name: String,
    pub value: String,
}

impl EventField {
    fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Structured result of one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncEvent {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub outcome: EpochOutcome,
    /// Added or changed entity ids, grouped by content type.
    pub changed_items: BTreeMap<String, Vec<String>>,
    pub fields: Vec<EventField>,
    pub trigger_time: DateTime<Utc>,
}

impl SyncEvent {
    /// Builds the event of a finalized epoch. An epoch without outcome reports as failure.
    pub fn from_epoch(epoch: &SyncEpoch) -> Self {
        let outcome = epoch.outcome.unwrap_or(EpochOutcome::Failure);
        let title = match outcome {
            EpochOutcome::Success => "Content updated",
            EpochOutcome::Partial => "Content partially updated",
            EpochOutcome::Failure if epoch.cancelled => "Content sync cancelled",
            EpochOutcome::Failure => "Content sync failed",
            EpochOutcome::Unchanged => "No content update",
        };

        let mut lines = Vec::new();
        if let Some(err) = &epoch.error {
            lines.push(format!("Sync stopped before fetching: {err}"));
        }
        for kind in &epoch.kinds {
            let old = kind
                .old_version
                .as_ref()
                .map_or_else(|| "none".to_string(), |v| v.to_string());
            let state = if kind.committed {
                "committed"
            } else {
                "not committed"
            };
            if kind.restored() {
                lines.push(format!(
                    "{}: {} restored after cache expiry ({state})",
                    capitalize(kind.kind.label()),
                    kind.new_version
                ));
                continue;
            }
            lines.push(format!(
                "{}: {} -> {} ({state})",
                capitalize(kind.kind.label()),
                old,
                kind.new_version
            ));
        }
        if outcome == EpochOutcome::Unchanged {
            lines.push("Game data and localization versions match upstream.".to_string());
        }

        let mut fields = Vec::new();
        let failed: Vec<String> = epoch
            .segments_failed()
            .into_iter()
            .map(|(target, err)| format!("{target}: {}", err.class()))
            .collect();
        if !failed.is_empty() {
            fields.push(EventField::new("Failed segments", failed.join("\n")));
        }
        let commit_errors: Vec<String> = epoch
            .kinds
            .iter()
            .filter_map(|k| {
                k.commit_error
                    .as_ref()
                    .map(|e| format!("{}: {}", k.kind.label(), e.class()))
            })
            .collect();
        if !commit_errors.is_empty() {
            fields.push(EventField::new("Commit errors", commit_errors.join("\n")));
        }
        if let Some(err) = &epoch.error {
            fields.push(EventField::new("Error class", err.class()));
        }
        if !epoch.unknown_changes.is_empty() {
            let targets: Vec<String> = epoch.unknown_changes.iter().map(|t| t.to_string()).collect();
            fields.push(EventField::new("Unknown changes", targets.join(", ")));
        }
        if !epoch.diff_summary.removed.is_empty() {
            fields.push(EventField::new(
                "Removed",
                epoch.diff_summary.removed.len().to_string(),
            ));
        }

        Self {
            title: title.to_string(),
            description: lines.join("\n"),
            severity: Severity::for_outcome(outcome),
            outcome,
            changed_items: epoch.diff_summary.touched_by_collection(),
            fields,
            trigger_time: epoch.trigger_time,
        }
    }

    /// Whether the event concerns the given kind.
    pub fn mentions(&self, kind: DataKind) -> bool {
        self.description.contains(&capitalize(kind.label()))
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Consumer of sync events.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn deliver(&self, event: &SyncEvent) -> Result<()>;
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, event: &SyncEvent) -> Result<()> {
        let changed: usize = event.changed_items.values().map(Vec::len).sum();
        match event.severity {
            Severity::Error => error!(outcome = %event.outcome, "{}: {}", event.title, event.description),
            Severity::Warning => warn!(outcome = %event.outcome, "{}: {}", event.title, event.description),
            Severity::Success | Severity::Info => {
                info!(outcome = %event.outcome, changed, "{}: {}", event.title, event.description)
            }
        }
        Ok(())
    }
}

/// Sending half handed to the orchestrator.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    sender: mpsc::UnboundedSender<Arc<SyncEvent>>,
}

impl EventEmitter {
    /// Queues `event`. Returns `false` when the dispatcher is gone.
    pub fn emit(&self, event: SyncEvent) -> bool {
        match self.sender.send(Arc::new(event)) {
            Ok(()) => true,
            Err(_) => {
                warn!("Notification dispatcher stopped; event dropped");
                false
            }
        }
    }
}

/// Fans queued events out to the registered sinks.
pub struct NotificationDispatcher {
    sinks: Vec<Arc<dyn NotificationSink>>,
    receiver: mpsc::UnboundedReceiver<Arc<SyncEvent>>,
}

impl NotificationDispatcher {
    /// Creates a dispatcher and the emitter feeding it.
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> (EventEmitter, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        for sink in &sinks {
            info!("Notification sink '{}' registered", sink.name());
        }
        (EventEmitter { sender }, Self { sinks, receiver })
    }

    /// Delivers events until every emitter has been dropped.
    pub async fn run(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.fan_out(&event).await;
        }
        debug!("Notification dispatcher finished");
    }

    /// Delivers the events already queued and returns how many there were.
    pub async fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(event) = self.receiver.try_recv() {
            self.fan_out(&event).await;
            delivered += 1;
        }
        delivered
    }

    async fn fan_out(&self, event: &Arc<SyncEvent>) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(event).await {
                warn!(sink = sink.name(), error_class = e.class(), "Notification delivery failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diff::EntityId;
    use crate::core::diff::DiffSummary;
    use crate::core::epoch::{DiffOutcome, KindReport, SegmentReport, Trigger};
    use crate::errors::SyncError;
    use crate::model::{FetchTarget, Segment};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<SyncEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl NotificationSink for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn deliver(&self, event: &SyncEvent) -> Result<()> {
            self.events.lock().unwrap().push(event.clone());
            if self.fail {
                Err(SyncError::UpstreamUnreachable("webhook".into()))
            } else {
                Ok(())
            }
        }
    }

    fn partial_epoch() -> SyncEpoch {
        let mut epoch = SyncEpoch::start(Trigger::Scheduled);
        let mut kind = KindReport::new(DataKind::GameData, Some("6".into()), "7".into());
        for segment in Segment::ALL {
            let error = (segment == Segment::Partial3)
                .then(|| SyncError::UpstreamTimeout("data".into()));
            let diff = (segment == Segment::Full).then(|| {
                let mut summary = DiffSummary::default();
                summary.added.insert(EntityId::new("units", "CAL"));
                DiffOutcome::Known(summary)
            });
            kind.segments.push(SegmentReport {
                target: FetchTarget::GameData(segment),
                attempts: 3,
                error,
                diff,
            });
        }
        epoch.kinds.push(kind);
        epoch.finalize();
        epoch
    }

    #[test]
    fn partial_event_names_failed_segment_and_class() {
        let epoch = partial_epoch();
        let event = SyncEvent::from_epoch(&epoch);
        assert_eq!(event.outcome, EpochOutcome::Partial);
        assert_eq!(event.severity, Severity::Warning);
        assert!(event.description.contains("Game data: 6 -> 7 (not committed)"));
        assert!(event.mentions(DataKind::GameData));
        let failed = event.fields.iter().find(|f| f.name == "Failed segments").unwrap();
        assert_eq!(failed.value, "PARTIAL_3: UpstreamTimeout");
        assert_eq!(event.changed_items["units"], vec!["CAL"]);
    }

    #[test]
    fn unchanged_event_is_info() {
        let mut epoch = SyncEpoch::start(Trigger::Manual);
        epoch.finalize();
        let event = SyncEvent::from_epoch(&epoch);
        assert_eq!(event.severity, Severity::Info);
        assert_eq!(event.title, "No content update");
        assert!(event.changed_items.is_empty());
    }

    #[tokio::test]
    async fn fan_out_survives_failing_sink() {
        let failing = Arc::new(Recorder { fail: true, ..Default::default() });
        let healthy = Arc::new(Recorder::default());
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![
            failing.clone() as Arc<dyn NotificationSink>,
            healthy.clone() as Arc<dyn NotificationSink>,
            Arc::new(LogSink),
        ];
        let (emitter, mut dispatcher) = NotificationDispatcher::new(sinks);

        assert!(emitter.emit(SyncEvent::from_epoch(&partial_epoch())));
        assert_eq!(dispatcher.dispatch_pending().await, 1);
        assert_eq!(failing.events.lock().unwrap().len(), 1);
        assert_eq!(healthy.events.lock().unwrap().len(), 1);

        // Nothing is redelivered.
        assert_eq!(dispatcher.dispatch_pending().await, 0);
    }

    #[tokio::test]
    async fn emit_after_dispatcher_drop_reports_false() {
        let (emitter, dispatcher) = NotificationDispatcher::new(Vec::new());
        drop(dispatcher);
        assert!(!emitter.emit(SyncEvent::from_epoch(&partial_epoch())));
    }
}
