//! Discord-compatible webhook transport for sync events.
//!
//! Each event becomes one embed. Changed items are listed as `- <id>` lines in
//! one field per content type, truncated to the embed limits.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use url::{Position, Url};

use crate::configs::NotifySettings;
use crate::core::dispatcher::{NotificationSink, Severity, SyncEvent};
use crate::core::epoch::EpochOutcome;
use crate::errors::{Result, SyncError};

use super::ky_http::ApiClient;

pub const COLOR_SUCCESS: u32 = 0x2ECC71;
pub const COLOR_ERROR: u32 = 0xE74C3C;
pub const COLOR_WARNING: u32 = 0xF1C40F;
pub const COLOR_INFO: u32 = 0x3498DB;

const TITLE_LIMIT: usize = 256;
const DESCRIPTION_LIMIT: usize = 4096;
const FIELD_NAME_LIMIT: usize = 256;
const FIELD_VALUE_LIMIT: usize = 1024;
const FIELD_COUNT_LIMIT: usize = 25;

pub fn color_for(severity: Severity) -> u32 {
    match severity {
        Severity::Success => COLOR_SUCCESS,
        Severity::Error => COLOR_ERROR,
        Severity::Warning => COLOR_WARNING,
        Severity::Info => COLOR_INFO,
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<EmbedField>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct WebhookMessage {
    pub embeds: Vec<Embed>,
}

impl WebhookMessage {
    pub fn from_event(event: &SyncEvent) -> Self {
        let mut fields = Vec::new();
        for field in &event.fields {
            fields.push(EmbedField {
                name: truncate(&field.name, FIELD_NAME_LIMIT),
                value: truncate(&field.value, FIELD_VALUE_LIMIT),
                inline: false,
            });
        }
        for (content_type, ids) in &event.changed_items {
            fields.push(EmbedField {
                name: truncate(&format!("New or changed {content_type}"), FIELD_NAME_LIMIT),
                value: bullet_list(ids, FIELD_VALUE_LIMIT),
                inline: false,
            });
        }
        fields.truncate(FIELD_COUNT_LIMIT);

        Self {
            embeds: vec![Embed {
                title: truncate(&event.title, TITLE_LIMIT),
                description: truncate(&event.description, DESCRIPTION_LIMIT),
                color: color_for(event.severity),
                fields,
                timestamp: event.trigger_time.to_rfc3339(),
            }],
        }
    }
}

/// Cuts `text` to at most `limit` characters, marking the cut with `…`.
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// `- id` lines that fit in `limit` characters, with a trailing count of what was left out.
fn bullet_list(ids: &[String], limit: usize) -> String {
    let mut out = String::new();
    for (index, id) in ids.iter().enumerate() {
        let line = format!("- {id}");
        let remaining = ids.len() - index;
        let footer = format!("\n… and {remaining} more");
        let separator = usize::from(!out.is_empty());
        let needed = out.chars().count() + separator + line.chars().count();
        // Keep room for the footer unless this is the last line.
        let reserve = if remaining > 1 { footer.chars().count() } else { 0 };
        if needed + reserve > limit {
            out.push_str(&footer);
            return truncate(out.trim_start_matches('\n'), limit);
        }
        if separator == 1 {
            out.push('\n');
        }
        out.push_str(&line);
    }
    out
}

/// Posts events to a webhook.
pub struct WebhookSink {
    /// `None` when no webhook is configured.
    target: Option<(ApiClient, String)>,
    notify_unchanged: bool,
}

impl WebhookSink {
    pub fn new(settings: &NotifySettings, timeout: Duration) -> Result<Self> {
        settings.validate()?;
        let target = match &settings.webhook_url {
            None => {
                warn!("No webhook URL configured; webhook notifications are disabled");
                None
            }
            Some(raw) => {
                let url = Url::parse(raw)
                    .map_err(|e| SyncError::Config(format!("invalid webhook URL: {e}")))?;
                let origin = url.origin().ascii_serialization();
                let path = url[Position::BeforePath..].to_string();
                Some((ApiClient::new(&origin, None, timeout, 0)?, path))
            }
        };
        Ok(Self {
            target,
            notify_unchanged: settings.notify_unchanged,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, event: &SyncEvent) -> Result<()> {
        if event.outcome == EpochOutcome::Unchanged && !self.notify_unchanged {
            return Ok(());
        }
        let Some((client, path)) = &self.target else {
            warn!(title = %event.title, "Webhook URL not configured; skipping notification");
            return Ok(());
        };
        let message = WebhookMessage::from_event(event);
        client.post_discard(path, &message).await?;
        info!(title = %event.title, "Sent webhook notification");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::dispatcher::EventField;
    use crate::retrieve::ky_http::tests::serve_once;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn event(outcome: EpochOutcome, severity: Severity) -> SyncEvent {
        SyncEvent {
            title: "Content updated".into(),
            description: "Game data: 6 -> 7 (committed)".into(),
            severity,
            outcome,
            changed_items: BTreeMap::from([(
                "units".to_string(),
                vec!["CALKESTIS".to_string(), "SECONDSISTER".to_string()],
            )]),
            fields: vec![EventField {
                name: "Failed segments".into(),
                value: "PARTIAL_3: UpstreamTimeout".into(),
            }],
            trigger_time: Utc::now(),
        }
    }

    #[test]
    fn embed_lists_items_as_bullets() {
        let message = WebhookMessage::from_event(&event(EpochOutcome::Success, Severity::Success));
        let embed = &message.embeds[0];
        assert_eq!(embed.color, 0x2ECC71);
        assert_eq!(embed.fields.len(), 2);
        assert_eq!(embed.fields[1].name, "New or changed units");
        assert_eq!(embed.fields[1].value, "- CALKESTIS\n- SECONDSISTER");
    }

    #[test]
    fn long_lists_are_cut_with_a_count() {
        let ids: Vec<String> = (0..500).map(|i| format!("UNIT_{i:04}")).collect();
        let value = bullet_list(&ids, FIELD_VALUE_LIMIT);
        assert!(value.chars().count() <= FIELD_VALUE_LIMIT);
        assert!(value.starts_with("- UNIT_0000\n- UNIT_0001"));
        assert!(value.contains("more"));
    }

    #[test]
    fn severity_colors() {
        assert_eq!(color_for(Severity::Error), 0xE74C3C);
        assert_eq!(color_for(Severity::Warning), 0xF1C40F);
        assert_eq!(color_for(Severity::Info), 0x3498DB);
    }

    #[tokio::test]
    async fn missing_url_skips_delivery() {
        let sink = WebhookSink::new(&NotifySettings::default(), Duration::from_secs(1)).unwrap();
        assert!(sink.deliver(&event(EpochOutcome::Failure, Severity::Error)).await.is_ok());
    }

    #[tokio::test]
    async fn posts_embed_to_webhook_path() {
        let (base, server) = serve_once("204 No Content", "", Duration::ZERO);
        let settings = NotifySettings {
            webhook_url: Some(format!("{base}api/webhooks/1/token")),
            notify_unchanged: false,
        };
        let sink = WebhookSink::new(&settings, Duration::from_secs(5)).unwrap();
        sink.deliver(&event(EpochOutcome::Partial, Severity::Warning))
            .await
            .unwrap();

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /api/webhooks/1/token "));
        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent["embeds"][0]["color"], 0xF1C40F);
        assert_eq!(sent["embeds"][0]["title"], "Content updated");
    }

    #[tokio::test]
    async fn unchanged_events_are_skipped_by_default() {
        // The URL points nowhere; delivery would fail if attempted.
        let settings = NotifySettings {
            webhook_url: Some("http://127.0.0.1:9/hook".into()),
            notify_unchanged: false,
        };
        let sink = WebhookSink::new(&settings, Duration::from_millis(200)).unwrap();
        assert!(sink.deliver(&event(EpochOutcome::Unchanged, Severity::Info)).await.is_ok());
    }
}
