use chrono::{DateTime, Duration, Utc};

use super::checker::Checker;
use super::types::CheckOutcome;
use crate::database::models::Monitor;

/// Checks that an external heartbeat arrived within `interval + grace`.
///
/// The heartbeat endpoint writes `last_checked_at`; this checker only reads it.
pub struct HeartbeatChecker;

/// UP iff the last heartbeat is no older than `interval + grace` seconds
pub fn evaluate(
    last_heartbeat: Option<DateTime<Utc>>,
    interval_seconds: u32,
    grace_period_seconds: u32,
    now: DateTime<Utc>,
) -> CheckOutcome {
    let Some(last) = last_heartbeat else {
        return CheckOutcome::failure(0, "No heartbeat received yet");
    };

    let allowed = Duration::seconds(i64::from(interval_seconds) + i64::from(grace_period_seconds));
    if now - last <= allowed {
        CheckOutcome::success(0)
    } else {
        CheckOutcome::failure(0, "Request not received")
    }
}

#[async_trait::async_trait]
impl Checker for HeartbeatChecker {
    async fn check(&self, monitor: &Monitor) -> CheckOutcome {
        evaluate(monitor.last_checked_at, monitor.interval_seconds, monitor.grace_period_seconds, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_interval_and_grace_is_up() {
        let now = Utc::now();
        let outcome = evaluate(Some(now - Duration::seconds(65)), 60, 10, now);
        assert!(outcome.success);
    }

    #[test]
    fn test_boundary_is_inclusive() {
        let now = Utc::now();
        assert!(evaluate(Some(now - Duration::seconds(70)), 60, 10, now).success);
    }

    #[test]
    fn test_stale_heartbeat_is_down() {
        let now = Utc::now();
        let outcome = evaluate(Some(now - Duration::seconds(71)), 60, 10, now);
        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("Request not received"));
    }

    #[test]
    fn test_never_received_is_down() {
        let outcome = evaluate(None, 60, 10, Utc::now());
        assert!(!outcome.success);
        assert_eq!(outcome.error_message.as_deref(), Some("No heartbeat received yet"));
    }
}
