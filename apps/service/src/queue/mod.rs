//! Durable, at-least-once job channel between the scheduler and workers.

pub mod in_memory;
pub mod jetstream;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use in_memory::InMemoryQueue;
pub use jetstream::JetStreamQueue;

/// One scheduled check, as published by the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckJob {
    pub monitor_id: Uuid,
    pub workspace_id: Uuid,
    pub enqueued_at: DateTime<Utc>,
}

impl CheckJob {
    pub fn new(monitor_id: Uuid, workspace_id: Uuid) -> Self {
        Self { monitor_id, workspace_id, enqueued_at: Utc::now() }
    }

    pub fn encode(&self) -> Result<Vec<u8>, QueueError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue connection failed: {0}")]
    Connect(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("acknowledgement failed: {0}")]
    Ack(String),
    #[error("job encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Producer side of the queue
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, job: &CheckJob) -> Result<(), QueueError>;
}

/// A received job that must be settled exactly once
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Raw payload; decoding is the worker's job so malformed payloads can be rejected
    fn payload(&self) -> &[u8];

    /// 1 on first delivery, incremented on each redelivery
    fn attempt(&self) -> u64;

    /// Remove the job from the queue
    async fn ack(&self) -> Result<(), QueueError>;

    /// Return the job to the queue for redelivery
    async fn reject(&self) -> Result<(), QueueError>;
}

/// Consumer side of the queue, pulling one job at a time
#[async_trait]
pub trait JobConsumer: Send {
    /// Next delivery, or `None` if nothing arrived within the poll window
    async fn receive(&mut self) -> Result<Option<Box<dyn Delivery>>, QueueError>;
}
