use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};
use crate::model::{GAME_DATA_TTL, LOCALIZATION_TTL, PLAYER_DATA_TTL};

pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_CONCURRENT_FETCHES: usize = 5;

/// Content service endpoint and credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    pub base_url: String,
    pub access_key: Option<String>,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Transient-error retries for player lookups only. Segment fetches are retried by the orchestrator.
    pub player_retries: u32,
    pub include_pve_units: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            access_key: None,
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
            player_retries: 2,
            include_pve_units: false,
        }
    }
}

impl UpstreamSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "upstream URL must be http(s): '{}'",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(SyncError::Config("upstream timeout must be positive".into()));
        }
        Ok(())
    }
}

impl fmt::Display for UpstreamSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (access key: {}, timeout: {}s, player retries: {})",
            self.base_url,
            if self.access_key.is_some() { "set" } else { "none" },
            self.timeout.as_secs(),
            self.player_retries
        )
    }
}

/// Cache backend address. An explicit `url` wins over host/port/password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub player_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 6379,
            password: None,
            player_ttl: PLAYER_DATA_TTL,
        }
    }
}

impl CacheSettings {
    /// Connection URL in the form accepted by the redis client.
    pub fn redis_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        match &self.password {
            Some(password) => format!("redis://:{password}@{}:{}/", self.host, self.port),
            None => format!("redis://{}:{}/", self.host, self.port),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_none() && self.host.trim().is_empty() {
            return Err(SyncError::Config("cache host is empty".into()));
        }
        if self.player_ttl.is_zero() {
            return Err(SyncError::Config("player TTL must be positive".into()));
        }
        Ok(())
    }
}

/// Bounded exponential backoff for transient upstream failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySettings {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetrySettings {
    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`, capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SyncError::Config("retry max_attempts must be at least 1".into()));
        }
        if self.base_delay > self.max_delay {
            return Err(SyncError::Config("retry base delay exceeds max delay".into()));
        }
        Ok(())
    }
}

/// Which game-data segments an epoch refetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentPolicy {
    /// FULL and the four partials.
    #[default]
    AllSegments,
    /// FULL only.
    FullOnly,
}

impl FromStr for SegmentPolicy {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "all" | "all_segments" => Ok(SegmentPolicy::AllSegments),
            "full" | "full_only" => Ok(SegmentPolicy::FullOnly),
            other => Err(SyncError::Config(format!("unknown segment policy '{other}'"))),
        }
    }
}

/// Knobs of the synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    pub segment_policy: SegmentPolicy,
    pub retry: RetrySettings,
    /// Outer bound on one fetch attempt.
    pub fetch_timeout: Duration,
    /// Bound on each cache read, cache write and version commit.
    pub io_timeout: Duration,
    pub game_data_ttl: Duration,
    pub localization_ttl: Duration,
    pub localization_unzip: bool,
    pub max_concurrent_fetches: usize,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            segment_policy: SegmentPolicy::AllSegments,
            retry: RetrySettings::default(),
            fetch_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
            game_data_ttl: GAME_DATA_TTL,
            localization_ttl: LOCALIZATION_TTL,
            localization_unzip: true,
            max_concurrent_fetches: DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

impl SyncPolicy {
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        if self.max_concurrent_fetches == 0 {
            return Err(SyncError::Config("max_concurrent_fetches must be at least 1".into()));
        }
        for (name, value) in [
            ("fetch_timeout", self.fetch_timeout),
            ("io_timeout", self.io_timeout),
            ("game_data_ttl", self.game_data_ttl),
            ("localization_ttl", self.localization_ttl),
        ] {
            if value.is_zero() {
                return Err(SyncError::Config(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Outbound notification settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifySettings {
    /// Discord-compatible webhook. Without it webhook notifications are skipped.
    pub webhook_url: Option<String>,
    /// Also post events of epochs that found nothing to do.
    pub notify_unchanged: bool,
}

impl NotifySettings {
    pub fn validate(&self) -> Result<()> {
        match &self.webhook_url {
            Some(url) if !url.starts_with("https://") && !url.starts_with("http://") => Err(
                SyncError::Config(format!("webhook URL must be http(s): '{url}'")),
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetrySettings {
            max_attempts: 6,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
        };
        assert_eq!(retry.delay_for(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for(3), Duration::from_millis(400));
        assert_eq!(retry.delay_for(4), Duration::from_millis(500));
        assert_eq!(retry.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(UpstreamSettings::default().validate().is_ok());
        assert!(CacheSettings::default().validate().is_ok());
        assert!(SyncPolicy::default().validate().is_ok());
        assert!(NotifySettings::default().validate().is_ok());
        assert_eq!(SyncPolicy::default().retry.max_attempts, 3);
        assert_eq!(SyncPolicy::default().fetch_timeout, Duration::from_secs(60));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let policy = SyncPolicy {
            max_concurrent_fetches: 0,
            ..SyncPolicy::default()
        };
        assert!(matches!(policy.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn redis_url_prefers_explicit_url() {
        let mut cache = CacheSettings {
            password: Some("hunter2".into()),
            ..CacheSettings::default()
        };
        assert_eq!(cache.redis_url(), "redis://:hunter2@localhost:6379/");
        cache.url = Some("redis://cache:6380/2".into());
        assert_eq!(cache.redis_url(), "redis://cache:6380/2");
    }

    #[test]
    fn segment_policy_parses_aliases() {
        assert_eq!("full-only".parse::<SegmentPolicy>().unwrap(), SegmentPolicy::FullOnly);
        assert_eq!("ALL".parse::<SegmentPolicy>().unwrap(), SegmentPolicy::AllSegments);
        assert!("some".parse::<SegmentPolicy>().is_err());
    }

    #[test]
    fn display_hides_access_key() {
        let upstream = UpstreamSettings {
            access_key: Some("secret".into()),
            ..UpstreamSettings::default()
        };
        let shown = upstream.to_string();
        assert!(!shown.contains("secret"));
        assert!(shown.contains("access key: set"));
    }
}
