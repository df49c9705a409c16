//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use pulse_service::alerts::{Notifier, NotifyError};
use pulse_service::config::Config;
use pulse_service::database::Database;
use pulse_service::database::models::{AlertChannel, ChannelType, Monitor, MonitorType, PendingAlert};
use pulse_service::monitoring::{CheckOutcome, Checker, MonitoringExecutor};
use pulse_service::queue::{CheckJob, InMemoryQueue, JobQueue};
use pulse_service::worker::{CheckProcessor, Worker};

/// Temporary on-disk store; keep the `TempDir` alive for the test's duration
pub async fn temp_store() -> (TempDir, Arc<dyn Database>) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.database.path = dir.path().join("pulse.db").to_string_lossy().into_owned();
    let database = pulse_service::connect_store(&config).await.unwrap();
    (dir, database)
}

/// Checker that replays queued outcomes, then keeps succeeding
#[derive(Default)]
pub struct ScriptedChecker {
    outcomes: Mutex<VecDeque<CheckOutcome>>,
    calls: AtomicUsize,
}

impl ScriptedChecker {
    pub fn push(&self, outcome: CheckOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn push_failures(&self, count: usize) {
        for _ in 0..count {
            self.push(CheckOutcome::failure(12, "Connection refused"));
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Checker for ScriptedChecker {
    async fn check(&self, _monitor: &Monitor) -> CheckOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| CheckOutcome::success(40))
    }
}

/// Store, queue and worker wired around a scripted HTTP checker
pub struct Pipeline {
    pub dir: TempDir,
    pub database: Arc<dyn Database>,
    pub queue: InMemoryQueue,
    pub checker: Arc<ScriptedChecker>,
    pub worker: Worker,
}

impl Pipeline {
    pub async fn new() -> Self {
        let (dir, database) = temp_store().await;
        let checker = Arc::new(ScriptedChecker::default());
        let executor = MonitoringExecutor::new(Duration::from_secs(1))
            .register(MonitorType::Http, checker.clone())
            .register(MonitorType::Heartbeat, Arc::new(pulse_service::monitoring::heartbeat::HeartbeatChecker));
        let processor = CheckProcessor::new(database.clone(), Arc::new(executor));

        Self { dir, database, queue: InMemoryQueue::new(), checker, worker: Worker::new(processor, 10) }
    }

    pub async fn add_monitor(&self, monitor: &Monitor) {
        self.database.insert_monitor(monitor).await.unwrap();
    }

    pub async fn add_channel(&self, workspace_id: Uuid, channel_type: ChannelType) -> AlertChannel {
        let destination = match &channel_type {
            ChannelType::Email => json!({ "email": "ops@example.com" }),
            ChannelType::Whatsapp | ChannelType::Sms => json!({ "number": "15550001111" }),
            ChannelType::Integration(_) => json!({ "webhook_url": "https://hooks.example.com/pulse" }),
        };
        let channel = AlertChannel::new(workspace_id, channel_type, destination);
        self.database.insert_alert_channel(&channel).await.unwrap();
        channel
    }

    /// Enqueue one job for `monitor` and work the queue dry
    pub async fn run_check(&self, monitor: &Monitor) {
        self.queue.publish(&CheckJob::new(monitor.id, monitor.workspace_id)).await.unwrap();
        self.worker.drain(&mut self.queue.consumer()).await.unwrap();
    }

    pub async fn monitor(&self, id: Uuid) -> Monitor {
        self.database.get_monitor(id).await.unwrap().unwrap()
    }
}

pub fn http_monitor(workspace_id: Uuid) -> Monitor {
    let mut monitor = Monitor::new(workspace_id, "https://example.com", MonitorType::Http);
    monitor.name = Some("Website".into());
    monitor.max_retries = 3;
    monitor
}

#[derive(Clone, Copy)]
pub enum Mode {
    Deliver,
    Transient,
    Permanent,
}

/// Notifier that records what it was asked to send
pub struct RecordingNotifier {
    mode: Mode,
    pub sent: Mutex<Vec<PendingAlert>>,
    pub attempts: AtomicUsize,
}

impl RecordingNotifier {
    pub fn new(mode: Mode) -> Self {
        Self { mode, sent: Mutex::new(Vec::new()), attempts: AtomicUsize::new(0) }
    }

    pub fn sent(&self) -> Vec<PendingAlert> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, alert: &PendingAlert) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            Mode::Deliver => {
                self.sent.lock().unwrap().push(alert.clone());
                Ok(())
            }
            Mode::Transient => Err(NotifyError::Transport("connection reset".into())),
            Mode::Permanent => Err(NotifyError::InvalidDestination("missing \"email\"".into())),
        }
    }
}
