use anyhow::{Context, Result};
use lib_datasync::configs::CacheSettings;
use lib_datasync::connections::{
    CacheWriter, FileVersionStore, MemoryCache, MemoryVersionStore, RedisCache, RedisVersionStore,
    VersionStore,
};
use lib_datasync::core::{
    LogSink, NotificationDispatcher, NotificationSink, PlayerService, SyncOrchestrator,
};
use lib_datasync::retrieve::{ComlinkClient, WebhookSink};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::config::{CacheBackend, ServerSettings, VersionBackend};

/// Shared by the HTTP handlers, the scheduler and the shutdown hook.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SyncOrchestrator>,
    pub players: Arc<PlayerService>,
    /// Parent of every epoch token; cancelled on shutdown.
    pub cancel: CancellationToken,
}

impl AppState {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, players: Arc<PlayerService>) -> Self {
        Self {
            orchestrator,
            players,
            cancel: CancellationToken::new(),
        }
    }
}

async fn build_cache(backend: &CacheBackend, settings: &CacheSettings) -> Result<Arc<dyn CacheWriter>> {
    Ok(match backend {
        CacheBackend::Redis => {
            let cache = RedisCache::connect(&settings.redis_url())
                .await
                .context("Failed to connect the Redis cache")?;
            info!(host = %settings.host, port = settings.port, "Using Redis cache");
            Arc::new(cache)
        }
        CacheBackend::Memory => {
            info!("Using in-memory cache");
            Arc::new(MemoryCache::new())
        }
    })
}

async fn build_version_store(
    backend: &VersionBackend,
    settings: &CacheSettings,
) -> Result<Arc<dyn VersionStore>> {
    Ok(match backend {
        VersionBackend::Redis => {
            let store = RedisVersionStore::connect(&settings.redis_url())
                .await
                .context("Failed to connect the Redis version store")?;
            info!("Using Redis version store");
            Arc::new(store)
        }
        VersionBackend::File(path) => {
            info!(path = %path.display(), "Using file version store");
            Arc::new(FileVersionStore::new(path.clone()))
        }
        VersionBackend::Memory => {
            info!("Using in-memory version store; versions are lost on restart");
            Arc::new(MemoryVersionStore::new())
        }
    })
}

/// Connects the backends and wires the engine.
///
/// The returned dispatcher must be driven with `run()`; it stops once the
/// orchestrator, and with it the last emitter, is dropped.
pub async fn build_state(settings: &ServerSettings) -> Result<(AppState, NotificationDispatcher)> {
    let cache = build_cache(&settings.cache_backend, &settings.cache).await?;
    let versions = build_version_store(&settings.version_backend, &settings.cache).await?;

    let comlink = Arc::new(
        ComlinkClient::new(&settings.upstream).context("Failed to build the content service client")?,
    );
    info!(upstream = %settings.upstream, "Content service client ready");

    let webhook = WebhookSink::new(&settings.notify, settings.upstream.timeout)
        .context("Failed to build the webhook sink")?;
    let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink), Arc::new(webhook)];
    let (emitter, dispatcher) = NotificationDispatcher::new(sinks);

    let orchestrator = Arc::new(SyncOrchestrator::new(
        comlink.clone(),
        cache.clone(),
        versions,
        emitter,
        settings.policy.clone(),
    ));
    let players = Arc::new(PlayerService::new(comlink, cache).with_ttl(settings.cache.player_ttl));

    Ok((AppState::new(orchestrator, players), dispatcher))
}
