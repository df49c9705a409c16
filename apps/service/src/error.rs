use thiserror::Error;
use uuid::Uuid;

use crate::database::models::MonitorType;
use crate::queue::QueueError;

/// Faults that abort processing of a check job.
///
/// Every variant leads to the job being rejected and redelivered. A check
/// that simply fails against its target is not an error; it is a DOWN
/// outcome.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("malformed check job: {0}")]
    MalformedJob(#[from] serde_json::Error),

    #[error("no executor registered for monitor type {monitor_type} (monitor {monitor_id})")]
    NoExecutor { monitor_id: Uuid, monitor_type: MonitorType },

    #[error("store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}
