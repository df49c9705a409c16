use std::time::Instant;

use tokio::net::TcpStream;
use tokio::time::timeout;

use super::checker::{Checker, elapsed_ms, host_and_port, remaining, resolve_timed};
use super::types::{CheckDetails, CheckOutcome, Timings};
use crate::database::models::Monitor;

/// TCP port checker
pub struct PortChecker;

#[async_trait::async_trait]
impl Checker for PortChecker {
    async fn check(&self, monitor: &Monitor) -> CheckOutcome {
        let start = Instant::now();
        let limit = monitor.timeout();

        let Some((host, port)) = host_and_port(&monitor.url, monitor.port, None) else {
            return CheckOutcome::failure(0, format!("Invalid host or missing port: {}", monitor.url));
        };

        let mut timings = Timings::default();
        let details = |connected: bool| CheckDetails::Port { host: host.clone(), port, connected };

        // IP literals resolve without touching the network
        let addrs = match resolve_timed(&host, port, limit).await {
            Ok((addrs, dns_ms)) => {
                timings.dns_lookup_ms = Some(dns_ms);
                addrs
            }
            Err(e) => {
                return CheckOutcome::failure(elapsed_ms(start), e)
                    .with_timings(timings)
                    .with_details(details(false));
            }
        };

        let connect_start = Instant::now();
        let outcome = match timeout(remaining(limit, start), TcpStream::connect(addrs.as_slice())).await {
            Ok(Ok(_stream)) => {
                timings.connect_ms = Some(elapsed_ms(connect_start));
                CheckOutcome::success(elapsed_ms(start)).with_details(details(true))
            }
            Ok(Err(e)) => CheckOutcome::failure(elapsed_ms(start), format!("Connection failed: {e}"))
                .with_details(details(false)),
            Err(_) => CheckOutcome::failure(elapsed_ms(start), "Connection timeout").with_details(details(false)),
        };

        outcome.with_timings(timings)
    }
}
