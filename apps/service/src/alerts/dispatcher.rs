use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::time::{MissedTickBehavior, interval, timeout};

use super::notifier::{Notifier, NotifyError};
use crate::config::AlertsConfig;
use crate::database::Database;
use crate::shutdown::{self, ShutdownSignal};

/// Counters for one dispatch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub due: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    /// Rows another dispatcher leased first
    pub skipped: usize,
    /// Rows whose outcome could not be written back; their lease expires and they are picked up again
    pub store_errors: usize,
}

/// Drains the alert outbox
pub struct AlertDispatcher {
    database: Arc<dyn Database>,
    notifier: Arc<dyn Notifier>,
    config: AlertsConfig,
}

impl AlertDispatcher {
    pub fn new(database: Arc<dyn Database>, notifier: Arc<dyn Notifier>, config: AlertsConfig) -> Self {
        Self { database, notifier, config }
    }

    fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_seconds.max(1))
    }

    /// Delay before retry number `attempts` (1-based): base * 2^(attempts - 1)
    pub fn backoff(&self, attempts: u32) -> chrono::Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let seconds = self.config.base_backoff_seconds.saturating_mul(1u64 << exponent);
        chrono::Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX / 1_000))
    }

    /// Deliver every alert due at `now`
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let due = self.database.due_alerts(now, self.config.batch_size).await?;
        let mut report = DispatchReport { due: due.len(), ..DispatchReport::default() };

        // The lease outlives the send timeout so a slow send is not picked up twice
        let lease_until = now + chrono::Duration::seconds(self.config.request_timeout_seconds.max(1) as i64 * 3);

        for alert in due {
            if !self.database.lease_alert(alert.id, now, lease_until).await? {
                report.skipped += 1;
                continue;
            }

            let result = match timeout(self.send_timeout(), self.notifier.send(&alert)).await {
                Ok(result) => result,
                Err(_) => Err(NotifyError::Transport(format!(
                    "timed out after {}s",
                    self.send_timeout().as_secs()
                ))),
            };

            match result {
                Ok(()) => {
                    if let Err(e) = self.database.complete_alert(&alert, Utc::now()).await {
                        report.store_errors += 1;
                        tracing::error!(alert_id = %alert.id, error = %e, "Failed to record delivered alert");
                        continue;
                    }
                    report.sent += 1;
                    tracing::info!(
                        incident_id = %alert.incident_id,
                        channel = %alert.channel.channel_type,
                        direction = %alert.direction,
                        "Alert delivered"
                    );
                }
                Err(e) => {
                    let attempts = alert.attempts + 1;
                    let give_up = e.is_permanent() || attempts >= self.config.max_attempts;
                    let retry_at = (!give_up).then(|| Utc::now() + self.backoff(attempts));

                    if let Err(store) = self.database.fail_alert(&alert, &e.to_string(), retry_at).await {
                        report.store_errors += 1;
                        tracing::error!(alert_id = %alert.id, error = %store, "Failed to record alert failure");
                        continue;
                    }

                    match retry_at {
                        None => {
                            report.failed += 1;
                            tracing::error!(
                                incident_id = %alert.incident_id,
                                channel = %alert.channel.channel_type,
                                attempts,
                                error = %e,
                                "Alert delivery gave up"
                            );
                        }
                        Some(retry_at) => {
                            report.retried += 1;
                            tracing::warn!(
                                incident_id = %alert.incident_id,
                                channel = %alert.channel.channel_type,
                                attempts,
                                %retry_at,
                                error = %e,
                                "Alert delivery failed, will retry"
                            );
                        }
                    }
                }
            }
        }

        Ok(report)
    }

    /// Poll the outbox on the configured cadence until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut timer = interval(Duration::from_secs(self.config.dispatch_interval_seconds.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(notifier = self.notifier.name(), "Alert dispatcher started");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.dispatch_due(Utc::now()).await {
                        tracing::error!(error = %e, "Alert dispatch pass failed");
                    }
                }
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }

        tracing::info!("Alert dispatcher stopped");
    }
}
