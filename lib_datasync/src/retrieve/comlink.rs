//! # Comlink Content Client
//!
//! The content service speaks JSON over `POST` only. Every body is wrapped as
//! `{"payload": {...}, "enums": false}`; the localization endpoint also takes a
//! top-level `unzip` flag.
//!
//! | path | payload |
//! |---|---|
//! | `metadata` | `{}` |
//! | `data` | `{version, includePveUnits, requestSegment}` |
//! | `localization` | `{id}` |
//! | `player` | `{allyCode}` |

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::configs::UpstreamSettings;
use crate::core::source::{PlayerSource, SegmentFetcher};
use crate::errors::Result;
use crate::model::{AllyCode, Metadata, Payload, Segment, Version};

use super::ky_http::ApiClient;

const METADATA_PATH: &str = "metadata";
const DATA_PATH: &str = "data";
const LOCALIZATION_PATH: &str = "localization";
const PLAYER_PATH: &str = "player";

#[derive(Debug, Serialize)]
struct Envelope<P: Serialize> {
    payload: P,
    enums: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    unzip: Option<bool>,
}

impl<P: Serialize> Envelope<P> {
    fn new(payload: P) -> Self {
        Self {
            payload,
            enums: false,
            unzip: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmptyPayload {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DataPayload<'a> {
    version: &'a str,
    include_pve_units: bool,
    request_segment: u8,
}

#[derive(Debug, Serialize)]
struct LocalizationPayload<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PlayerPayload<'a> {
    ally_code: &'a str,
}

/// Client of the content service.
///
/// Content requests go through a client without retry middleware, since the
/// orchestrator owns their retry policy. Player lookups use a client with
/// transport-level retries.
pub struct ComlinkClient {
    content: ApiClient,
    lookup: ApiClient,
    include_pve_units: bool,
}

impl ComlinkClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self> {
        settings.validate()?;
        let content = ApiClient::new(
            &settings.base_url,
            settings.access_key.clone(),
            settings.timeout,
            0,
        )?;
        let lookup = ApiClient::new(
            &settings.base_url,
            settings.access_key.clone(),
            settings.timeout,
            settings.player_retries,
        )?;
        Ok(Self {
            content,
            lookup,
            include_pve_units: settings.include_pve_units,
        })
    }
}

#[async_trait]
impl SegmentFetcher for ComlinkClient {
    async fn fetch_metadata(&self) -> Result<Metadata> {
        self.content
            .post_json(METADATA_PATH, &Envelope::new(EmptyPayload {}))
            .await
    }

    async fn fetch_segment(&self, version: &Version, segment: Segment) -> Result<Payload> {
        debug!(%version, %segment, "Requesting game data segment");
        let body = Envelope::new(DataPayload {
            version: version.as_str(),
            include_pve_units: self.include_pve_units,
            request_segment: segment.request_code(),
        });
        self.content.post_json(DATA_PATH, &body).await
    }

    async fn fetch_localization(&self, version: &Version, unzip: bool) -> Result<Payload> {
        debug!(%version, unzip, "Requesting localization bundle");
        let mut body = Envelope::new(LocalizationPayload { id: version.as_str() });
        body.unzip = Some(unzip);
        self.content.post_json(LOCALIZATION_PATH, &body).await
    }
}

#[async_trait]
impl PlayerSource for ComlinkClient {
    async fn fetch_player(&self, ally_code: &AllyCode) -> Result<Payload> {
        let body = Envelope::new(PlayerPayload {
            ally_code: ally_code.as_str(),
        });
        self.lookup.post_json(PLAYER_PATH, &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use crate::retrieve::ky_http::tests::serve_once;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn client(url: &str) -> ComlinkClient {
        let settings = UpstreamSettings {
            base_url: url.to_string(),
            access_key: Some("secret".into()),
            timeout: Duration::from_secs(5),
            player_retries: 0,
            include_pve_units: false,
        };
        ComlinkClient::new(&settings).unwrap()
    }

    fn sent_body(request: &str) -> Value {
        let (_, body) = request.split_once("\r\n\r\n").unwrap();
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn metadata_is_decoded() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"latestGamedataVersion":"0.36.1:abc","latestLocalizationBundleVersion":"loc-9","assetVersion":1}"#,
            Duration::ZERO,
        );
        let metadata = client(&url).fetch_metadata().await.unwrap();
        assert_eq!(metadata.latest_gamedata_version.as_str(), "0.36.1:abc");

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /metadata "));
        assert_eq!(sent_body(&request), json!({"payload": {}, "enums": false}));
    }

    #[tokio::test]
    async fn segment_request_carries_segment_code() {
        let (url, server) = serve_once("200 OK", r#"{"units":[]}"#, Duration::ZERO);
        let payload = client(&url)
            .fetch_segment(&Version::from("7"), Segment::Partial3)
            .await
            .unwrap();
        assert_eq!(payload, json!({"units": []}));

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /data "));
        assert_eq!(
            sent_body(&request),
            json!({
                "payload": {"version": "7", "includePveUnits": false, "requestSegment": 3},
                "enums": false
            })
        );
    }

    #[tokio::test]
    async fn localization_request_puts_unzip_at_top_level() {
        let (url, server) = serve_once("200 OK", r#"{"Loc_ENG_US.txt":"x"}"#, Duration::ZERO);
        client(&url)
            .fetch_localization(&Version::from("loc-9"), true)
            .await
            .unwrap();

        let request = server.join().unwrap();
        assert_eq!(
            sent_body(&request),
            json!({"unzip": true, "payload": {"id": "loc-9"}, "enums": false})
        );
    }

    #[tokio::test]
    async fn player_request_uses_normalized_code() {
        let (url, server) = serve_once("200 OK", r#"{"name":"Rey"}"#, Duration::ZERO);
        let code = AllyCode::parse("123-456-789").unwrap();
        let record = client(&url).fetch_player(&code).await.unwrap();
        assert_eq!(record["name"], "Rey");

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /player "));
        assert_eq!(
            sent_body(&request),
            json!({"payload": {"allyCode": "123456789"}, "enums": false})
        );
    }

    #[tokio::test]
    async fn not_found_is_an_upstream_error() {
        let (url, server) = serve_once("404 Not Found", "no such version", Duration::ZERO);
        let result = client(&url)
            .fetch_segment(&Version::from("0"), Segment::Full)
            .await;
        server.join().unwrap();
        assert!(matches!(result, Err(SyncError::UpstreamError { status: 404, .. })));
    }
}
