use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_datasync::configs::{
    CacheSettings, NotifySettings, RetrySettings, SegmentPolicy, SyncPolicy, UpstreamSettings,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "server_datasync.conf";
pub const DEFAULT_SCHEDULE: &str = "0 */15 * * * *";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Keeps the game-data cache in sync with the content service", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "DATASYNC_PORT", help = "Port of the status and player HTTP API.")]
    pub port: Option<u16>,

    #[clap(long, env = "DATASYNC_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "SWGOH_COMLINK_URL", help = "Base URL of the content service.")]
    pub comlink_url: Option<String>,

    #[clap(long, env = "SWGOH_COMLINK_ACCESS_KEY", help = "Bearer access key for the content service.")]
    pub comlink_access_key: Option<String>,

    #[clap(long, env = "DATASYNC_UPSTREAM_TIMEOUT_SECS", help = "Per-request timeout of upstream calls in seconds.")]
    pub upstream_timeout_secs: Option<u64>,

    #[clap(long, env = "DATASYNC_PLAYER_RETRIES", help = "HTTP-level retries of player lookups.")]
    pub player_retries: Option<u32>,

    #[clap(long, env = "DATASYNC_INCLUDE_PVE_UNITS", help = "Ask upstream to include PvE units (true/false).")]
    pub include_pve_units: Option<bool>,

    #[clap(long, env = "REDIS_URL", help = "Full Redis URL; wins over host, port and password.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "REDIS_HOST", help = "Redis host.")]
    pub redis_host: Option<String>,

    #[clap(long, env = "REDIS_PORT", help = "Redis port.")]
    pub redis_port: Option<u16>,

    #[clap(long, env = "REDIS_PASSWORD", help = "Redis password.")]
    pub redis_password: Option<String>,

    #[clap(long, env = "DATASYNC_PLAYER_TTL_SECS", help = "Lifetime of cached player records in seconds.")]
    pub player_ttl_secs: Option<u64>,

    #[clap(long, env = "DATASYNC_CACHE_BACKEND", help = "Cache backend: redis or memory.")]
    pub cache_backend: Option<String>,

    #[clap(long, env = "DATASYNC_VERSION_STORE", help = "Version store: redis, file or memory.")]
    pub version_store: Option<String>,

    #[clap(long, env = "DATASYNC_VERSION_FILE", help = "JSON file of the file version store.")]
    pub version_file: Option<PathBuf>,

    #[clap(long, env = "DATASYNC_SEGMENT_POLICY", help = "Segments refetched per epoch: all or full.")]
    pub segment_policy: Option<String>,

    #[clap(long, env = "DATASYNC_MAX_ATTEMPTS", help = "Attempts per segment fetch, first one included.")]
    pub max_attempts: Option<u32>,

    #[clap(long, env = "DATASYNC_BASE_DELAY_MS", help = "Base retry delay in milliseconds.")]
    pub base_delay_ms: Option<u64>,

    #[clap(long, env = "DATASYNC_MAX_DELAY_MS", help = "Maximum retry delay in milliseconds.")]
    pub max_delay_ms: Option<u64>,

    #[clap(long, env = "DATASYNC_FETCH_TIMEOUT_SECS", help = "Bound on one segment fetch attempt in seconds.")]
    pub fetch_timeout_secs: Option<u64>,

    #[clap(long, env = "DATASYNC_IO_TIMEOUT_SECS", help = "Bound on cache and version store calls in seconds.")]
    pub io_timeout_secs: Option<u64>,

    #[clap(long, env = "DATASYNC_CONCURRENCY", help = "Segment fetches in flight at once.")]
    pub concurrency: Option<usize>,

    #[clap(long, env = "DATASYNC_LOCALIZATION_UNZIP", help = "Ask upstream for an unzipped localization bundle (true/false).")]
    pub localization_unzip: Option<bool>,

    #[clap(long, env = "DISCORD_WEBHOOK_URL", help = "Discord-compatible webhook for sync notifications.")]
    pub webhook_url: Option<String>,

    #[clap(long, env = "DATASYNC_NOTIFY_UNCHANGED", help = "Also notify epochs that found nothing new (true/false).")]
    pub notify_unchanged: Option<bool>,

    #[clap(long, env = "DATASYNC_SCHEDULE", help = "Cron expression with seconds for scheduled epochs.")]
    pub schedule: Option<String>,

    #[clap(long, env = "DATASYNC_SYNC_ON_STARTUP", help = "Run one epoch right after start-up (true/false).")]
    pub sync_on_startup: Option<bool>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            comlink_url: other.comlink_url.or(self.comlink_url),
            comlink_access_key: other.comlink_access_key.or(self.comlink_access_key),
            upstream_timeout_secs: other.upstream_timeout_secs.or(self.upstream_timeout_secs),
            player_retries: other.player_retries.or(self.player_retries),
            include_pve_units: other.include_pve_units.or(self.include_pve_units),
            redis_url: other.redis_url.or(self.redis_url),
            redis_host: other.redis_host.or(self.redis_host),
            redis_port: other.redis_port.or(self.redis_port),
            redis_password: other.redis_password.or(self.redis_password),
            player_ttl_secs: other.player_ttl_secs.or(self.player_ttl_secs),
            cache_backend: other.cache_backend.or(self.cache_backend),
            version_store: other.version_store.or(self.version_store),
            version_file: other.version_file.or(self.version_file),
            segment_policy: other.segment_policy.or(self.segment_policy),
            max_attempts: other.max_attempts.or(self.max_attempts),
            base_delay_ms: other.base_delay_ms.or(self.base_delay_ms),
            max_delay_ms: other.max_delay_ms.or(self.max_delay_ms),
            fetch_timeout_secs: other.fetch_timeout_secs.or(self.fetch_timeout_secs),
            io_timeout_secs: other.io_timeout_secs.or(self.io_timeout_secs),
            concurrency: other.concurrency.or(self.concurrency),
            localization_unzip: other.localization_unzip.or(self.localization_unzip),
            webhook_url: other.webhook_url.or(self.webhook_url),
            notify_unchanged: other.notify_unchanged.or(self.notify_unchanged),
            schedule: other.schedule.or(self.schedule),
            sync_on_startup: other.sync_on_startup.or(self.sync_on_startup),
        }
    }

    fn defaults() -> Config {
        let upstream = UpstreamSettings::default();
        let cache = CacheSettings::default();
        let policy = SyncPolicy::default();
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            comlink_url: Some(upstream.base_url),
            upstream_timeout_secs: Some(upstream.timeout.as_secs()),
            player_retries: Some(upstream.player_retries),
            include_pve_units: Some(upstream.include_pve_units),
            redis_host: Some(cache.host),
            redis_port: Some(cache.port),
            player_ttl_secs: Some(cache.player_ttl.as_secs()),
            cache_backend: Some("redis".to_string()),
            version_store: Some("redis".to_string()),
            version_file: Some(PathBuf::from("./data/versions.json")),
            segment_policy: Some("all".to_string()),
            max_attempts: Some(policy.retry.max_attempts),
            base_delay_ms: Some(policy.retry.base_delay.as_millis() as u64),
            max_delay_ms: Some(policy.retry.max_delay.as_millis() as u64),
            fetch_timeout_secs: Some(policy.fetch_timeout.as_secs()),
            io_timeout_secs: Some(policy.io_timeout.as_secs()),
            concurrency: Some(policy.max_concurrent_fetches),
            localization_unzip: Some(policy.localization_unzip),
            notify_unchanged: Some(false),
            schedule: Some(DEFAULT_SCHEDULE.to_string()),
            sync_on_startup: Some(true),
            ..Default::default()
        }
    }

    /// Turns the merged values into the library settings, validating each group.
    pub fn resolve(&self) -> Result<ServerSettings> {
        let defaults = Config::defaults();
        let merged = defaults.merge(self.clone());

        let upstream = UpstreamSettings {
            base_url: merged.comlink_url.unwrap_or_default(),
            access_key: merged.comlink_access_key.filter(|k| !k.is_empty()),
            timeout: secs(merged.upstream_timeout_secs),
            player_retries: merged.player_retries.unwrap_or_default(),
            include_pve_units: merged.include_pve_units.unwrap_or_default(),
        };
        upstream.validate().context("Invalid upstream settings")?;

        let cache = CacheSettings {
            url: merged.redis_url.filter(|u| !u.is_empty()),
            host: merged.redis_host.unwrap_or_default(),
            port: merged.redis_port.unwrap_or_default(),
            password: merged.redis_password.filter(|p| !p.is_empty()),
            player_ttl: secs(merged.player_ttl_secs),
        };
        cache.validate().context("Invalid cache settings")?;

        let segment_policy: SegmentPolicy = merged
            .segment_policy
            .as_deref()
            .unwrap_or("all")
            .parse()
            .context("Invalid segment policy")?;
        let policy = SyncPolicy {
            segment_policy,
            retry: RetrySettings {
                max_attempts: merged.max_attempts.unwrap_or_default(),
                base_delay: Duration::from_millis(merged.base_delay_ms.unwrap_or_default()),
                max_delay: Duration::from_millis(merged.max_delay_ms.unwrap_or_default()),
            },
            fetch_timeout: secs(merged.fetch_timeout_secs),
            io_timeout: secs(merged.io_timeout_secs),
            localization_unzip: merged.localization_unzip.unwrap_or(true),
            max_concurrent_fetches: merged.concurrency.unwrap_or_default(),
            ..SyncPolicy::default()
        };
        policy.validate().context("Invalid sync policy")?;

        let notify = NotifySettings {
            webhook_url: merged.webhook_url.filter(|u| !u.is_empty()),
            notify_unchanged: merged.notify_unchanged.unwrap_or_default(),
        };
        notify.validate().context("Invalid notification settings")?;

        let cache_backend = match merged.cache_backend.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("redis") | None => CacheBackend::Redis,
            Some("memory") => CacheBackend::Memory,
            Some(other) => bail!("Unknown cache backend '{other}' (expected redis or memory)"),
        };
        let version_backend = match merged.version_store.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("redis") | None => VersionBackend::Redis,
            Some("file") => VersionBackend::File(
                merged
                    .version_file
                    .unwrap_or_else(|| PathBuf::from("./data/versions.json")),
            ),
            Some("memory") => VersionBackend::Memory,
            Some(other) => bail!("Unknown version store '{other}' (expected redis, file or memory)"),
        };

        let schedule = merged
            .schedule
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SCHEDULE.to_string());

        Ok(ServerSettings {
            port: merged.port.unwrap_or(8080),
            log_dir: merged.log_dir.unwrap_or_else(|| PathBuf::from("./logs")),
            log_level: merged.log_level.unwrap_or_else(|| "info".to_string()),
            upstream,
            cache,
            policy,
            notify,
            cache_backend,
            version_backend,
            schedule,
            sync_on_startup: merged.sync_on_startup.unwrap_or(true),
        })
    }
}

fn secs(value: Option<u64>) -> Duration {
    Duration::from_secs(value.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    Redis,
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionBackend {
    Redis,
    File(PathBuf),
    Memory,
}

/// Everything the binary needs after loading and validation.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub policy: SyncPolicy,
    pub notify: NotifySettings,
    pub cache_backend: CacheBackend,
    pub version_backend: VersionBackend,
    pub schedule: String,
    pub sync_on_startup: bool,
}

pub fn load_config() -> Result<ServerSettings> {
    load_config_from(Config::parse())
}

/// Defaults, then the JSON config file, then environment and CLI values.
pub fn load_config_from(cli_args: Config) -> Result<ServerSettings> {
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let mut current_config = Config::defaults();

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path)
            .with_context(|| format!("Failed to read config file {}", config_file_path.display()))?;
        let file_config = serde_json::from_str::<Config>(&config_str)
            .with_context(|| format!("Failed to parse config file {}", config_file_path.display()))?;
        current_config = current_config.merge(file_config);
    } else if cli_args.config_path.is_some() {
        bail!("Config file not found at {}", config_file_path.display());
    }

    current_config = current_config.merge(cli_args);
    current_config.resolve()
}
