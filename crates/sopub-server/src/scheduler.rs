//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at server startup and registers the
//! recurring recovery sweep.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

use sopub_engine::RecoveryScanner;

/// Builds and starts the background job scheduler.
///
/// Registers the recovery sweep on the configured cron expression and
/// starts the scheduler. Returns the running [`JobScheduler`] handle, which
/// must be kept alive for the lifetime of the process — dropping it shuts
/// down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// the job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    scanner: RecoveryScanner,
    cron: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    let scanner = Arc::new(scanner);
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let scanner = Arc::clone(&scanner);
        Box::pin(async move {
            match scanner.sweep().await {
                Ok(report) => {
                    tracing::debug!(?report, "scheduler: recovery sweep finished");
                }
                Err(e) => {
                    tracing::error!(error = %e, "scheduler: recovery sweep failed");
                }
            }
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron, "scheduler: registered recovery sweep");

    scheduler.start().await?;
    Ok(scheduler)
}
