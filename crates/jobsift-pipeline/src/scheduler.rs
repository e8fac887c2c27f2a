//! Cron-triggered runs. Overlapping triggers are skipped, never queued.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::Pipeline;

/// True when `expr` parses as a six-field cron schedule.
pub fn is_valid_cron(expr: &str) -> bool {
    Job::new_async(expr, |_uuid, _l| Box::pin(async {})).is_ok()
}

pub async fn build_scheduler(pipeline: Arc<Pipeline>, crons: &[String]) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let in_flight = Arc::new(Mutex::new(()));
    for cron in crons {
        let pipeline = Arc::clone(&pipeline);
        let in_flight = Arc::clone(&in_flight);
        let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
            let pipeline = Arc::clone(&pipeline);
            let in_flight = Arc::clone(&in_flight);
            Box::pin(async move {
                let Ok(_guard) = in_flight.try_lock() else {
                    warn!("previous run still in progress; skipping trigger");
                    return;
                };
                match pipeline.run().await {
                    Ok(report) => info!(
                        run_id = %report.stats.run_id,
                        status = %report.status,
                        written = report.stats.written,
                        "scheduled run finished"
                    ),
                    Err(err) => error!(error = %err, "scheduled run failed"),
                }
            })
        })
        .with_context(|| format!("creating scheduler job for cron {cron}"))?;
        sched.add(job).await.context("adding scheduler job")?;
    }
    Ok(sched)
}

/// Starts the scheduler and blocks until ctrl-c.
pub async fn run_scheduler_until_ctrl_c(pipeline: Arc<Pipeline>, crons: &[String]) -> Result<()> {
    let mut sched = build_scheduler(pipeline, crons).await?;
    sched.start().await.context("starting scheduler")?;
    info!(jobs = crons.len(), "scheduler started");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutting down scheduler");
    sched.shutdown().await.context("stopping scheduler")?;
    Ok(())
}
