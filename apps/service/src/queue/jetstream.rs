use std::time::Duration;

use async_nats::jetstream::{self, AckKind, Message};
use async_nats::jetstream::consumer::{AckPolicy, PullConsumer};
use async_nats::jetstream::stream::StorageType;
use async_trait::async_trait;
use futures::StreamExt;

use super::{CheckJob, Delivery, JobConsumer, JobQueue, QueueError};
use crate::config::QueueConfig;

/// How long to back off when a fetch comes back empty
const IDLE_BACKOFF: Duration = Duration::from_millis(250);

/// NATS JetStream backed queue
pub struct JetStreamQueue {
    js: jetstream::Context,
    config: QueueConfig,
}

impl JetStreamQueue {
    /// Connect and make sure the file-backed stream exists
    pub async fn connect(config: &QueueConfig) -> Result<Self, QueueError> {
        let client = async_nats::connect(config.nats_url.as_str())
            .await
            .map_err(|e| QueueError::Connect(format!("{}: {e}", config.nats_url)))?;
        let js = jetstream::new(client);

        let stream_config = jetstream::stream::Config {
            name: config.stream.clone(),
            subjects: vec![config.subject.clone()],
            storage: StorageType::File,
            ..Default::default()
        };
        js.get_or_create_stream(stream_config).await.map_err(|e| QueueError::Connect(e.to_string()))?;

        tracing::info!(stream = %config.stream, subject = %config.subject, "Connected to JetStream");
        Ok(Self { js, config: config.clone() })
    }

    /// Durable pull consumer with explicit acks and a single job in flight
    pub async fn consumer(&self) -> Result<JetStreamConsumer, QueueError> {
        let stream = self
            .js
            .get_stream(&self.config.stream)
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;

        let consumer_config = jetstream::consumer::pull::Config {
            durable_name: Some(self.config.consumer.clone()),
            ack_policy: AckPolicy::Explicit,
            ack_wait: Duration::from_secs(self.config.ack_wait_seconds.max(1)),
            max_deliver: self.config.max_deliver,
            max_ack_pending: 1,
            ..Default::default()
        };
        let consumer = stream
            .get_or_create_consumer(&self.config.consumer, consumer_config)
            .await
            .map_err(|e| QueueError::Connect(e.to_string()))?;

        Ok(JetStreamConsumer { consumer })
    }
}

#[async_trait]
impl JobQueue for JetStreamQueue {
    async fn publish(&self, job: &CheckJob) -> Result<(), QueueError> {
        let payload = job.encode()?;
        self.js
            .publish(self.config.subject.clone(), payload.into())
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?
            .await
            .map_err(|e| QueueError::Publish(e.to_string()))?;
        Ok(())
    }
}

pub struct JetStreamConsumer {
    consumer: PullConsumer,
}

#[async_trait]
impl JobConsumer for JetStreamConsumer {
    async fn receive(&mut self) -> Result<Option<Box<dyn Delivery>>, QueueError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(1)
            .messages()
            .await
            .map_err(|e| QueueError::Receive(e.to_string()))?;

        match messages.next().await {
            Some(Ok(message)) => Ok(Some(Box::new(JetStreamDelivery { message }))),
            Some(Err(e)) => Err(QueueError::Receive(e.to_string())),
            None => {
                tokio::time::sleep(IDLE_BACKOFF).await;
                Ok(None)
            }
        }
    }
}

struct JetStreamDelivery {
    message: Message,
}

#[async_trait]
impl Delivery for JetStreamDelivery {
    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    fn attempt(&self) -> u64 {
        self.message.info().map(|info| info.delivered.max(1) as u64).unwrap_or(1)
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.message.ack().await.map_err(|e| QueueError::Ack(e.to_string()))
    }

    async fn reject(&self) -> Result<(), QueueError> {
        self.message.ack_with(AckKind::Nak(None)).await.map_err(|e| QueueError::Ack(e.to_string()))
    }
}
