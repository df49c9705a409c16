//! Automatic retention and cleanup of check history.
//!
//! - Check rows older than the retention window are deleted, except those an
//!   incident points at as its trigger or resolving check
//! - Sent and failed outbox rows older than the same window are purged
//!
//! Cleanup runs periodically (hourly by default) as a background loop.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::database::Database;
use crate::shutdown::{self, ShutdownSignal};

/// Retention policy for stored history
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Days to keep check results and settled alerts
    pub check_days: i64,
    /// Seconds between cleanup passes
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            check_days: i64::from(config.check_days),
            interval: Duration::from_secs(config.interval_seconds.max(60)),
        }
    }
}

impl RetentionPolicy {
    fn retention_seconds(&self) -> i64 {
        self.check_days * 24 * 3600
    }

    /// Everything strictly older than this is eligible for deletion
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::seconds(self.retention_seconds())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub checks_deleted: u64,
    pub alerts_deleted: u64,
}

/// Cleanup manager for expired history
pub struct RetentionCleanup {
    database: Arc<dyn Database>,
    policy: RetentionPolicy,
}

impl RetentionCleanup {
    pub fn new(database: Arc<dyn Database>, policy: RetentionPolicy) -> Self {
        Self { database, policy }
    }

    /// Run one cleanup pass relative to `now`
    pub async fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = self.policy.cutoff(now);
        debug!(days = self.policy.check_days, %cutoff, "Starting retention cleanup");

        let report = CleanupReport {
            checks_deleted: self.database.delete_checks_before(cutoff).await?,
            alerts_deleted: self.database.delete_settled_alerts_before(cutoff).await?,
        };

        info!(
            checks_deleted = report.checks_deleted,
            alerts_deleted = report.alerts_deleted,
            "Retention cleanup completed"
        );
        Ok(report)
    }

    /// Clean up on the policy interval until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval(self.policy.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.cleanup_expired(Utc::now()).await {
                        warn!(error = %e, "Periodic retention cleanup failed");
                    }
                }
                _ = shutdown::requested(&mut shutdown) => break,
            }
        }
    }

    /// Start the cleanup loop as a background task
    pub fn start_periodic_cleanup(self, shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
