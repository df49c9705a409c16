use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::database::models::{CheckRecord, MonitorType};
use crate::database::{Database, TransitionCommit, TransitionReport};
use crate::error::PipelineError;
use crate::incident;
use crate::monitoring::MonitoringExecutor;
use crate::queue::CheckJob;

/// What a processed job amounted to; every variant is acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Checked { monitor_id: Uuid, check_id: Uuid, success: bool, report: TransitionReport },
    /// The monitor was deleted after the job was enqueued
    MonitorMissing(Uuid),
    /// The monitor was deactivated after the job was enqueued
    MonitorInactive(Uuid),
}

/// Runs one check job end to end
pub struct CheckProcessor {
    database: Arc<dyn Database>,
    executor: Arc<MonitoringExecutor>,
}

impl CheckProcessor {
    pub fn new(database: Arc<dyn Database>, executor: Arc<MonitoringExecutor>) -> Self {
        Self { database, executor }
    }

    pub async fn process(&self, payload: &[u8]) -> Result<JobOutcome, PipelineError> {
        let job: CheckJob = serde_json::from_slice(payload)?;

        let Some(monitor) = self.database.get_monitor(job.monitor_id).await? else {
            tracing::info!(monitor_id = %job.monitor_id, "Monitor no longer exists, dropping job");
            return Ok(JobOutcome::MonitorMissing(job.monitor_id));
        };
        if !monitor.is_active {
            tracing::debug!(monitor_id = %monitor.id, "Monitor inactive, skipping check");
            return Ok(JobOutcome::MonitorInactive(monitor.id));
        }

        let outcome = self
            .executor
            .execute_check(&monitor)
            .await
            .ok_or(PipelineError::NoExecutor { monitor_id: monitor.id, monitor_type: monitor.monitor_type })?;

        let checked_at = Utc::now();
        let check = CheckRecord::from_outcome(monitor.id, checked_at, &outcome);
        self.database.insert_check(&check).await?;

        let open = self.database.open_incident(monitor.id).await?;
        let transition = incident::evaluate(&monitor, &outcome, open.as_ref());
        let (resolve, open) = transition.incident_changes(&monitor, &outcome);

        let commit = TransitionCommit {
            monitor_id: monitor.id,
            workspace_id: monitor.workspace_id,
            monitor_label: monitor.label().to_string(),
            check_id: check.id,
            checked_at,
            consecutive_failures: transition.consecutive_failures,
            status: transition.status,
            response_time_ms: outcome.response_time_ms,
            touch_last_checked: monitor.monitor_type != MonitorType::Heartbeat,
            resolve,
            open,
        };
        let report = self.database.commit_transition(&commit).await?;

        tracing::debug!(
            monitor_id = %monitor.id,
            status = %outcome.status,
            response_time_ms = outcome.response_time_ms,
            consecutive_failures = transition.consecutive_failures,
            "Check processed"
        );
        if let Some(incident_id) = report.opened {
            tracing::info!(
                monitor_id = %monitor.id,
                %incident_id,
                alerts_queued = report.alerts_queued,
                "Incident opened"
            );
        }
        if let Some(incident_id) = report.resolved {
            tracing::info!(monitor_id = %monitor.id, %incident_id, "Incident resolved");
        }

        Ok(JobOutcome::Checked { monitor_id: monitor.id, check_id: check.id, success: outcome.success, report })
    }
}
