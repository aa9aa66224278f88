use anyhow::{Result, anyhow};
use lib_datasync::SyncError;
use lib_datasync::core::Trigger;
use tokio_cron_scheduler::{JobBuilder, JobScheduler};
use tracing::{debug, error, info, warn};

use super::state::AppState;

/// Runs one epoch for `trigger` and logs how it ended.
///
/// A trigger that collides with an in-flight epoch is dropped, not queued.
pub async fn run_triggered(state: &AppState, trigger: Trigger) {
    if state.cancel.is_cancelled() {
        debug!(?trigger, "Shutting down; sync trigger ignored");
        return;
    }
    match state
        .orchestrator
        .run_epoch(trigger, state.cancel.child_token())
        .await
    {
        Ok(epoch) => info!(
            ?trigger,
            outcome = ?epoch.outcome,
            processed = epoch.segments_processed().len(),
            failed = epoch.segments_failed().len(),
            "Sync epoch finished"
        ),
        Err(SyncError::EpochInFlight) => {
            warn!(?trigger, "Sync trigger dropped: an epoch is already in flight")
        }
        Err(e) => error!(?trigger, "Sync epoch could not run: {e}"),
    }
}

/// Starts a scheduler firing a `Scheduled` epoch on every tick of `schedule`
/// (cron with seconds, UTC).
pub async fn start_scheduler(schedule: &str, state: AppState) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("Failed to create the job scheduler: {e:?}"))?;

    let job = JobBuilder::new()
        .with_cron_job_type()
        .with_schedule(schedule)
        .map_err(|e| anyhow!("Invalid sync schedule '{schedule}': {e:?}"))?
        .with_run_async(Box::new(move |uuid, mut l| {
            let state = state.clone();
            Box::pin(async move {
                run_triggered(&state, Trigger::Scheduled).await;
                match l.next_tick_for_job(uuid).await {
                    Ok(Some(ts)) => debug!(next = %ts, "Next scheduled sync"),
                    _ => warn!("Could not get the next tick of the sync job"),
                }
            })
        }))
        .build()
        .map_err(|e| anyhow!("Failed to build the sync job: {e:?}"))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow!("Failed to add the sync job: {e:?}"))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow!("Failed to start the job scheduler: {e:?}"))?;
    info!(schedule, "Sync scheduler started");
    Ok(scheduler)
}
