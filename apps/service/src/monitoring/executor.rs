use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use super::checker::{Checker, elapsed_ms};
use super::dns::DnsChecker;
use super::domain_ssl::DomainSslChecker;
use super::heartbeat::HeartbeatChecker;
use super::http::HttpChecker;
use super::ping::PingChecker;
use super::port::PortChecker;
use super::types::CheckOutcome;
use crate::config::WorkerConfig;
use crate::database::models::{Monitor, MonitorType};

/// Monitoring executor - maps monitor types to checkers and bounds every run
pub struct MonitoringExecutor {
    checkers: HashMap<MonitorType, Arc<dyn Checker>>,
    timeout_slack: Duration,
}

impl MonitoringExecutor {
    /// Empty registry; checks against unregistered types are refused
    pub fn new(timeout_slack: Duration) -> Self {
        Self { checkers: HashMap::new(), timeout_slack }
    }

    /// Registry with every built-in checker
    pub fn with_defaults(config: &WorkerConfig) -> Result<Self> {
        let http: Arc<dyn Checker> = Arc::new(HttpChecker::new()?);

        Ok(Self::new(Duration::from_millis(config.timeout_slack_ms))
            .register(MonitorType::Http, http.clone())
            .register(MonitorType::Keyword, http.clone())
            .register(MonitorType::AiSynthetic, http.clone())
            .register(MonitorType::AiHealthCheck, http)
            .register(MonitorType::Port, Arc::new(PortChecker))
            .register(MonitorType::Dns, Arc::new(DnsChecker::new()))
            .register(MonitorType::Ping, Arc::new(PingChecker::new(config.ping_count)?))
            .register(MonitorType::Heartbeat, Arc::new(HeartbeatChecker))
            .register(MonitorType::DomainSsl, Arc::new(DomainSslChecker::new()?)))
    }

    pub fn register(mut self, monitor_type: MonitorType, checker: Arc<dyn Checker>) -> Self {
        self.checkers.insert(monitor_type, checker);
        self
    }

    pub fn supports(&self, monitor_type: MonitorType) -> bool {
        self.checkers.contains_key(&monitor_type)
    }

    /// Run the checker for `monitor`.
    ///
    /// Returns `None` when no checker is registered for its type. A run that
    /// outlives the monitor timeout plus slack is cancelled and reported DOWN.
    pub async fn execute_check(&self, monitor: &Monitor) -> Option<CheckOutcome> {
        let checker = self.checkers.get(&monitor.monitor_type)?;
        let limit = monitor.timeout() + self.timeout_slack;
        let start = Instant::now();

        let outcome = match tokio::time::timeout(limit, checker.check(monitor)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    monitor_id = %monitor.id,
                    monitor_type = %monitor.monitor_type,
                    limit_ms = limit.as_millis() as u64,
                    "Check exceeded its time budget and was cancelled"
                );
                CheckOutcome::failure(elapsed_ms(start), format!("Check timed out after {}ms", limit.as_millis()))
            }
        };

        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct Sleeper(Duration);

    #[async_trait::async_trait]
    impl Checker for Sleeper {
        async fn check(&self, _monitor: &Monitor) -> CheckOutcome {
            tokio::time::sleep(self.0).await;
            CheckOutcome::success(self.0.as_millis() as u64)
        }
    }

    #[tokio::test]
    async fn test_unregistered_type_returns_none() {
        let executor = MonitoringExecutor::new(Duration::ZERO);
        let monitor = Monitor::new(Uuid::new_v4(), "https://example.com", MonitorType::Http);
        assert!(executor.execute_check(&monitor).await.is_none());
        assert!(!executor.supports(MonitorType::Http));
    }

    #[tokio::test]
    async fn test_slow_checker_is_cancelled() {
        let executor = MonitoringExecutor::new(Duration::from_millis(50))
            .register(MonitorType::Port, Arc::new(Sleeper(Duration::from_secs(30))));
        let mut monitor = Monitor::new(Uuid::new_v4(), "127.0.0.1:1", MonitorType::Port);
        monitor.timeout_ms = 100;

        let start = Instant::now();
        let outcome = executor.execute_check(&monitor).await.unwrap();
        assert!(!outcome.success);
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(outcome.error_message.unwrap().starts_with("Check timed out"));
    }

    #[tokio::test]
    async fn test_defaults_cover_every_type() {
        let executor = MonitoringExecutor::with_defaults(&WorkerConfig::default()).unwrap();
        for monitor_type in [
            MonitorType::Http,
            MonitorType::Heartbeat,
            MonitorType::Ping,
            MonitorType::Port,
            MonitorType::Dns,
            MonitorType::Keyword,
            MonitorType::AiSynthetic,
            MonitorType::AiHealthCheck,
            MonitorType::DomainSsl,
        ] {
            assert!(executor.supports(monitor_type), "{monitor_type} missing");
        }
    }
}
