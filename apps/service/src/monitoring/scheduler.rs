use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use tokio::time::{MissedTickBehavior, interval, timeout};

use crate::config::SchedulerConfig;
use crate::database::Database;
use crate::queue::{CheckJob, JobQueue};
use crate::shutdown::{self, ShutdownSignal};

/// Counters for one scheduler pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub claimed: usize,
    pub published: usize,
    pub publish_failures: usize,
}

/// Monitoring scheduler - claims due monitors and enqueues check jobs
pub struct MonitoringScheduler {
    database: Arc<dyn Database>,
    queue: Arc<dyn JobQueue>,
    config: SchedulerConfig,
}

impl MonitoringScheduler {
    pub fn new(database: Arc<dyn Database>, queue: Arc<dyn JobQueue>, config: SchedulerConfig) -> Self {
        Self { database, queue, config }
    }

    /// Scan, claim and enqueue once.
    ///
    /// Only monitors this pass actually claimed are published. A publish
    /// failure is logged and the monitor waits for its next interval.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let limit = self.config.claim_timeout();
        let due = timeout(limit, self.database.due_monitors(now, self.config.batch_size))
            .await
            .map_err(|_| anyhow!("due monitor scan timed out after {}ms", limit.as_millis()))??;

        let mut report = TickReport { due: due.len(), ..TickReport::default() };

        for monitor in &due {
            let claimed = match timeout(limit, self.database.claim_monitor(monitor, now)).await {
                Ok(Ok(claimed)) => claimed,
                Ok(Err(e)) => {
                    tracing::warn!(monitor_id = %monitor.id, error = %e, "Claim failed");
                    continue;
                }
                Err(_) => {
                    tracing::warn!(monitor_id = %monitor.id, "Claim timed out");
                    continue;
                }
            };

            // Another scheduler got there first
            if !claimed {
                continue;
            }
            report.claimed += 1;

            let job = CheckJob::new(monitor.id, monitor.workspace_id);
            match self.queue.publish(&job).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.publish_failures += 1;
                    tracing::error!(monitor_id = %monitor.id, error = %e, "Failed to enqueue check job");
                }
            }
        }

        if report.due > 0 {
            tracing::debug!(
                due = report.due,
                claimed = report.claimed,
                published = report.published,
                "Scheduler tick finished"
            );
        }
        Ok(report)
    }

    /// Tick on the configured cadence until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut timer = interval(self.config.tick());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            tick_seconds = self.config.tick_seconds,
            batch_size = self.config.batch_size,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        tracing::error!(error = %e, "Scheduler tick failed");
                    }
                }
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }

        tracing::info!("Scheduler stopped");
    }
}
