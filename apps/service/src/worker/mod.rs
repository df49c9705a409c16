//! Check worker: pulls jobs one at a time, runs them through the processor
//! and settles each delivery. Scaling out means running more workers against
//! the same durable consumer.

pub mod processor;

use std::time::Duration;

pub use processor::{CheckProcessor, JobOutcome};

use crate::queue::{Delivery, JobConsumer, QueueError};
use crate::shutdown::{self, ShutdownSignal};

/// Pause after a failed receive before polling again
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

pub struct Worker {
    processor: CheckProcessor,
    max_deliver: i64,
}

impl Worker {
    pub fn new(processor: CheckProcessor, max_deliver: i64) -> Self {
        Self { processor, max_deliver }
    }

    /// Process one delivery and ack or reject it.
    ///
    /// Returns the processing result so callers can inspect it; settling
    /// errors are the only errors surfaced here.
    pub async fn handle(&self, delivery: &dyn Delivery) -> Result<Option<JobOutcome>, QueueError> {
        let attempt = delivery.attempt();
        if self.max_deliver > 0 && attempt as i64 > self.max_deliver / 2 {
            tracing::warn!(attempt, max_deliver = self.max_deliver, "Check job redelivered repeatedly");
        }

        match self.processor.process(delivery.payload()).await {
            Ok(outcome) => {
                delivery.ack().await?;
                Ok(Some(outcome))
            }
            Err(e) => {
                tracing::error!(error = %e, attempt, "Check job failed, requeueing");
                delivery.reject().await?;
                Ok(None)
            }
        }
    }

    /// Handle whatever is queued right now; returns how many deliveries were settled
    pub async fn drain(&self, consumer: &mut dyn JobConsumer) -> Result<usize, QueueError> {
        let mut handled = 0;
        while let Some(delivery) = consumer.receive().await? {
            self.handle(delivery.as_ref()).await?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Consume until shutdown. An in-flight job always finishes before exit.
    pub async fn run(&self, mut consumer: Box<dyn JobConsumer>, mut shutdown: ShutdownSignal) {
        tracing::info!("Worker started");

        loop {
            let received = tokio::select! {
                received = consumer.receive() => received,
                _ = shutdown::requested(&mut shutdown) => break,
            };

            match received {
                Ok(Some(delivery)) => {
                    if let Err(e) = self.handle(delivery.as_ref()).await {
                        tracing::error!(error = %e, "Failed to settle check job");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Failed to receive check job");
                    tokio::time::sleep(RECEIVE_BACKOFF).await;
                }
            }
        }

        tracing::info!("Worker stopped");
    }
}
