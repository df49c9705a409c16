use std::process::Stdio;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;

use super::checker::{Checker, elapsed_ms, host_of};
use super::types::{CheckDetails, CheckOutcome};
use crate::database::models::Monitor;

/// Time reserved after the `ping` deadline for the process to exit and print
const PROCESS_MARGIN: Duration = Duration::from_millis(500);

/// Parsed summary of a `ping` run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PingStats {
    pub packet_loss_percent: Option<f64>,
    pub min_ms: Option<f64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

impl PingStats {
    /// Reachable when at least one reply came back
    pub fn alive(&self) -> bool {
        match self.packet_loss_percent {
            Some(loss) => loss < 100.0,
            None => self.avg_ms.is_some(),
        }
    }
}

/// ICMP checker shelling out to the system `ping` binary
pub struct PingChecker {
    packets: u32,
    loss: Regex,
    unix_rtt: Regex,
    windows_rtt: Regex,
}

impl PingChecker {
    pub fn new(packets: u32) -> anyhow::Result<Self> {
        Ok(Self {
            packets: packets.max(1),
            // "3 packets transmitted, 3 received, 0% packet loss" / "(0% loss)"
            loss: Regex::new(r"(\d+(?:\.\d+)?)% (?:packet )?loss")?,
            // "rtt min/avg/max/mdev = 0.041/0.052/0.067/0.011 ms"
            unix_rtt: Regex::new(r"= ([\d.]+)/([\d.]+)/([\d.]+)")?,
            // "Minimum = 1ms, Maximum = 3ms, Average = 2ms"
            windows_rtt: Regex::new(r"Minimum = (\d+)ms, Maximum = (\d+)ms, Average = (\d+)ms")?,
        })
    }

    pub fn parse(&self, output: &str) -> PingStats {
        let number = |caps: &regex::Captures<'_>, idx: usize| caps.get(idx).and_then(|m| m.as_str().parse::<f64>().ok());

        let mut stats = PingStats {
            packet_loss_percent: self.loss.captures(output).and_then(|caps| number(&caps, 1)),
            ..PingStats::default()
        };

        if let Some(caps) = self.unix_rtt.captures(output) {
            stats.min_ms = number(&caps, 1);
            stats.avg_ms = number(&caps, 2);
            stats.max_ms = number(&caps, 3);
        } else if let Some(caps) = self.windows_rtt.captures(output) {
            stats.min_ms = number(&caps, 1);
            stats.max_ms = number(&caps, 2);
            stats.avg_ms = number(&caps, 3);
        }
        stats
    }

    fn command(&self, host: &str, limit: Duration) -> Command {
        let mut command = Command::new("ping");
        let packets = self.packets.to_string();
        if cfg!(windows) {
            let wait_ms = (limit.as_millis() / u128::from(self.packets)).max(1).to_string();
            command.args(["-n", packets.as_str(), "-w", wait_ms.as_str(), host]);
        } else {
            // -w bounds the whole run, so the summary is printed before we give up
            let deadline = deadline_secs(limit).to_string();
            command.args(["-c", packets.as_str(), "-w", deadline.as_str(), host]);
        }
        command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);
        command
    }
}

/// Whole seconds handed to `ping -w`, leaving room to collect its output within `limit`
pub fn deadline_secs(limit: Duration) -> u64 {
    limit.saturating_sub(PROCESS_MARGIN).as_secs().max(1)
}

/// How long to wait for the `ping` process; equals `limit` unless the one second
/// minimum deadline does not fit
fn process_budget(limit: Duration) -> Duration {
    limit.max(Duration::from_secs(deadline_secs(limit)) + PROCESS_MARGIN)
}

#[async_trait::async_trait]
impl Checker for PingChecker {
    async fn check(&self, monitor: &Monitor) -> CheckOutcome {
        let start = Instant::now();
        let Some(host) = host_of(&monitor.url) else {
            return CheckOutcome::failure(0, format!("Invalid host: {}", monitor.url));
        };

        let limit = monitor.timeout();
        let overall = process_budget(limit);

        let output = match timeout(overall, self.command(&host, limit).output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return CheckOutcome::failure(elapsed_ms(start), format!("Failed to run ping: {e}")),
            Err(_) => return CheckOutcome::failure(elapsed_ms(start), "Ping timeout"),
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stats = self.parse(&stdout);
        let alive = output.status.success() && stats.alive();
        let response_time_ms = stats.avg_ms.map(|avg| avg.round() as u64).unwrap_or_else(|| elapsed_ms(start));

        let details = CheckDetails::Ping {
            packets_sent: self.packets,
            packet_loss_percent: stats.packet_loss_percent,
            min_ms: stats.min_ms,
            avg_ms: stats.avg_ms,
            max_ms: stats.max_ms,
        };

        if alive {
            CheckOutcome::success(response_time_ms).with_details(details)
        } else {
            CheckOutcome::failure(response_time_ms, "Host unreachable").with_details(details)
        }
    }
}
