use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::{CheckJob, Delivery, JobConsumer, JobQueue, QueueError};
use crate::config::QueueConfig;

/// How long `receive` waits for a job before reporting an empty poll
const POLL_WINDOW: Duration = Duration::from_millis(100);

struct Pending {
    payload: Vec<u8>,
    attempt: u64,
}

#[derive(Default)]
struct Inner {
    jobs: Mutex<VecDeque<Pending>>,
    notify: Notify,
    published: AtomicUsize,
    acked: AtomicUsize,
    rejected: AtomicUsize,
    dropped: AtomicUsize,
}

/// Process-local queue with the same ack/reject semantics as JetStream.
///
/// Rejected jobs go to the back of the queue with their attempt counter bumped.
/// A job rejected on its `max_deliver`th delivery is dropped.
#[derive(Clone)]
pub struct InMemoryQueue {
    inner: Arc<Inner>,
    max_deliver: i64,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::with_max_deliver(QueueConfig::default().max_deliver)
    }
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-positive `max_deliver` redelivers without limit, like JetStream's `-1`
    pub fn with_max_deliver(max_deliver: i64) -> Self {
        Self { inner: Arc::default(), max_deliver }
    }

    /// Enqueue an arbitrary payload, bypassing job encoding
    pub async fn publish_raw(&self, payload: Vec<u8>) {
        self.push(Pending { payload, attempt: 1 }).await;
        self.inner.published.fetch_add(1, Ordering::Relaxed);
    }

    async fn push(&self, pending: Pending) {
        self.inner.jobs.lock().await.push_back(pending);
        self.inner.notify.notify_one();
    }

    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer { queue: self.clone() }
    }

    pub async fn len(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn published_count(&self) -> usize {
        self.inner.published.load(Ordering::Relaxed)
    }

    pub fn acked_count(&self) -> usize {
        self.inner.acked.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> usize {
        self.inner.rejected.load(Ordering::Relaxed)
    }

    /// Jobs given up on after exhausting their deliveries
    pub fn dropped_count(&self) -> usize {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Decoded copies of the queued jobs, front first
    pub async fn queued_jobs(&self) -> Vec<CheckJob> {
        self.inner
            .jobs
            .lock()
            .await
            .iter()
            .filter_map(|pending| serde_json::from_slice(&pending.payload).ok())
            .collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn publish(&self, job: &CheckJob) -> Result<(), QueueError> {
        self.publish_raw(job.encode()?).await;
        Ok(())
    }
}

pub struct InMemoryConsumer {
    queue: InMemoryQueue,
}

#[async_trait]
impl JobConsumer for InMemoryConsumer {
    async fn receive(&mut self) -> Result<Option<Box<dyn Delivery>>, QueueError> {
        let inner = &self.queue.inner;
        loop {
            // notify_one stores a permit when nobody is waiting yet
            let notified = inner.notify.notified();
            if let Some(pending) = inner.jobs.lock().await.pop_front() {
                return Ok(Some(Box::new(InMemoryDelivery {
                    queue: self.queue.clone(),
                    payload: pending.payload,
                    attempt: pending.attempt,
                    settled: AtomicBool::new(false),
                })));
            }
            if tokio::time::timeout(POLL_WINDOW, notified).await.is_err() {
                return Ok(None);
            }
        }
    }
}

struct InMemoryDelivery {
    queue: InMemoryQueue,
    payload: Vec<u8>,
    attempt: u64,
    settled: AtomicBool,
}

impl InMemoryDelivery {
    fn settle(&self) -> Result<(), QueueError> {
        if self.settled.swap(true, Ordering::SeqCst) {
            return Err(QueueError::Ack("delivery already settled".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn attempt(&self) -> u64 {
        self.attempt
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.settle()?;
        self.queue.inner.acked.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn reject(&self) -> Result<(), QueueError> {
        self.settle()?;
        self.queue.inner.rejected.fetch_add(1, Ordering::Relaxed);

        let max_deliver = self.queue.max_deliver;
        if max_deliver > 0 && self.attempt >= max_deliver as u64 {
            self.queue.inner.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(attempt = self.attempt, max_deliver, "Check job exhausted its deliveries, dropping");
            return Ok(());
        }

        self.queue.push(Pending { payload: self.payload.clone(), attempt: self.attempt + 1 }).await;
        Ok(())
    }
}
