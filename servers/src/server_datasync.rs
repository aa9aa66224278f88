//! # Content Sync Server
//!
//! Keeps the game-data and localization cache in step with the content service.
//!
//! ## Features
//! - **Scheduled epochs**: a cron job polls upstream versions (every 15 minutes by
//!   default) and one epoch runs right after start-up.
//! - **HTTP API**: `GET /status`, `GET /player/{ally_code}` and `POST /sync`.
//! - **Notifications**: every epoch ends with one event, written to the log and
//!   posted to the configured webhook.
//! - **Configurable**: defaults, then a JSON config file, then environment variables
//!   and command-line flags.
//! - **Graceful Shutdown**: `tokio-graceful` handles Ctrl+C and SIGTERM; an
//!   in-flight epoch is cancelled before it commits anything.

mod datasync_logic;

use anyhow::{Context, Result};
use datasync_logic::{config, routes, schedule, state};
use lib_datasync::core::Trigger;
use lib_datasync::loggers::setup_logging;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_graceful::Shutdown;
use tracing::{error, info, warn};

const APP_NAME: &str = "server_datasync";
const SHUTDOWN_LIMIT: Duration = Duration::from_secs(30);
const NOTIFY_DRAIN_LIMIT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let settings = config::load_config().context("Failed to load configuration")?;
    let _log_guard = setup_logging(&settings.log_dir, &settings.log_level, APP_NAME)?;
    info!(
        port = settings.port,
        schedule = %settings.schedule,
        segment_policy = ?settings.policy.segment_policy,
        "Starting {APP_NAME}"
    );

    let (app_state, dispatcher) = state::build_state(&settings).await?;
    let dispatcher_handle = tokio::spawn(dispatcher.run());

    let shutdown: Shutdown = tokio_graceful::Shutdown::default();

    let mut scheduler = schedule::start_scheduler(&settings.schedule, app_state.clone()).await?;
    let cancel = app_state.cancel.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        guard.cancelled().await;
        info!("Signal received: cancelling in-flight sync and stopping the scheduler");
        cancel.cancel();
        if let Err(e) = scheduler.shutdown().await {
            warn!("Scheduler shutdown failed: {e:?}");
        }
    });

    if settings.sync_on_startup {
        let startup_state = app_state.clone();
        shutdown.spawn_task(async move {
            schedule::run_triggered(&startup_state, Trigger::Startup).await;
        });
    }

    let listener = TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("Failed to bind port {}", settings.port))?;
    info!("HTTP API listening on {}", listener.local_addr()?);
    let app = routes::router(app_state.clone());
    shutdown.spawn_task_fn(move |guard| async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move { guard.cancelled().await })
            .await;
        if let Err(e) = served {
            error!("HTTP server error: {e}");
        }
    });

    match shutdown.shutdown_with_limit(SHUTDOWN_LIMIT).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            warn!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    // The dispatcher ends once the last emitter is gone; give it a moment to
    // deliver the final epoch event.
    drop(app_state);
    if tokio::time::timeout(NOTIFY_DRAIN_LIMIT, dispatcher_handle)
        .await
        .is_err()
    {
        warn!("Pending notifications dropped at shutdown");
    }

    info!("Shutdown complete.");
    Ok(())
}
