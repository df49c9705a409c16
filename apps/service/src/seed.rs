//! Import monitors and alert channels from a TOML file.
//!
//! ```toml
//! [[channels]]
//! key = "ops-mail"
//! workspace_id = "6f1c..."
//! type = "email"
//! destination = { email = "ops@example.com" }
//!
//! [[monitors]]
//! workspace_id = "6f1c..."
//! name = "Website"
//! url = "https://example.com"
//! type = "http"
//! expected_status = ["2xx"]
//! channels = ["ops-mail"]
//! ```
//!
//! Channels listed on a monitor are subscribed explicitly and only alert
//! for the monitors that name them, unless `all_monitors = true` is set.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;
use uuid::Uuid;

use crate::database::Database;
use crate::database::models::{
    AlertChannel, ChannelType, DnsRecordExpectation, KeywordMatch, Monitor, MonitorType,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub channels: Vec<SeedChannel>,
    pub monitors: Vec<SeedMonitor>,
}

#[derive(Debug, Deserialize)]
pub struct SeedChannel {
    /// Name monitors use to reference this channel
    pub key: String,
    pub id: Option<Uuid>,
    pub workspace_id: Uuid,
    #[serde(rename = "type")]
    pub channel_type: String,
    pub destination: serde_json::Value,
    #[serde(default)]
    pub all_monitors: bool,
}

#[derive(Debug, Deserialize)]
pub struct SeedMonitor {
    pub id: Option<Uuid>,
    pub workspace_id: Uuid,
    pub name: Option<String>,
    pub url: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub port: Option<u16>,
    pub method: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub interval_seconds: Option<u32>,
    pub timeout_ms: Option<u32>,
    #[serde(default)]
    pub expected_status: Vec<String>,
    pub keyword: Option<String>,
    pub keyword_match: Option<String>,
    #[serde(default)]
    pub dns_records: Vec<DnsRecordExpectation>,
    pub grace_period_seconds: Option<u32>,
    pub max_retries: Option<u32>,
    pub slow_response_threshold_ms: Option<u32>,
    pub active: Option<bool>,
    #[serde(default)]
    pub channels: Vec<String>,
}

impl SeedMonitor {
    fn into_monitor(self) -> Result<(Monitor, Vec<String>)> {
        let monitor_type: MonitorType = self.monitor_type.parse()?;
        let mut monitor = Monitor::new(self.workspace_id, self.url, monitor_type);

        if let Some(id) = self.id {
            monitor.id = id;
        }
        monitor.name = self.name;
        monitor.port = self.port;
        if let Some(method) = self.method {
            monitor.method = method.to_ascii_uppercase();
        }
        monitor.headers = self.headers;
        monitor.body = self.body;
        monitor.interval_seconds = self.interval_seconds.unwrap_or(monitor.interval_seconds).max(1);
        monitor.timeout_ms = self.timeout_ms.unwrap_or(monitor.timeout_ms);
        monitor.expected_status = self.expected_status;
        monitor.keyword = self.keyword;
        monitor.keyword_match = self.keyword_match.as_deref().map(str::parse::<KeywordMatch>).transpose()?;
        monitor.dns_records = self.dns_records;
        monitor.grace_period_seconds = self.grace_period_seconds.unwrap_or(monitor.grace_period_seconds);
        monitor.max_retries = self.max_retries.unwrap_or(monitor.max_retries);
        monitor.slow_response_threshold_ms = self.slow_response_threshold_ms;
        monitor.is_active = self.active.unwrap_or(true);

        if monitor.monitor_type == MonitorType::Keyword && monitor.keyword.is_none() {
            bail!("keyword monitor {} has no keyword", monitor.url);
        }
        Ok((monitor, self.channels))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub channels: usize,
    pub monitors: usize,
    pub subscriptions: usize,
}

pub fn parse(contents: &str) -> Result<SeedFile> {
    Ok(toml::from_str(contents)?)
}

pub fn read(path: &Path) -> Result<SeedFile> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse(&contents).with_context(|| format!("parsing {}", path.display()))
}

/// Write everything in `seed` to the store
pub async fn apply(database: &dyn Database, seed: SeedFile) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    let mut channels: HashMap<String, Uuid> = HashMap::new();

    for entry in seed.channels {
        let channel_type: ChannelType = entry.channel_type.parse()?;
        let mut channel = AlertChannel::new(entry.workspace_id, channel_type, entry.destination);
        if let Some(id) = entry.id {
            channel.id = id;
        }
        channel.all_monitors = entry.all_monitors;

        if channels.insert(entry.key.clone(), channel.id).is_some() {
            bail!("duplicate channel key {}", entry.key);
        }
        database.insert_alert_channel(&channel).await?;
        report.channels += 1;
    }

    for entry in seed.monitors {
        let (monitor, channel_keys) = entry.into_monitor()?;
        database.insert_monitor(&monitor).await?;
        report.monitors += 1;

        for key in channel_keys {
            let channel_id = channels
                .get(&key)
                .ok_or_else(|| anyhow!("monitor {} references unknown channel {key}", monitor.url))?;
            database.subscribe_channel(monitor.id, *channel_id).await?;
            report.subscriptions += 1;
        }
        tracing::debug!(monitor_id = %monitor.id, url = %monitor.url, "Seeded monitor");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [[channels]]
        key = "ops"
        workspace_id = "00000000-0000-0000-0000-000000000001"
        type = "slack"
        destination = { webhook_url = "https://hooks.example.com/x" }

        [[monitors]]
        workspace_id = "00000000-0000-0000-0000-000000000001"
        name = "Website"
        url = "https://example.com"
        type = "keyword"
        keyword = "Welcome"
        keyword_match = "not_exists"
        expected_status = ["2xx", "301"]
        channels = ["ops"]

        [[monitors]]
        workspace_id = "00000000-0000-0000-0000-000000000001"
        url = "example.com"
        type = "dns"
        dns_records = [{ type = "A", value = "93.184.216.34" }]
    "#;

    #[test]
    fn test_parse_sample() {
        let seed = parse(SAMPLE).unwrap();
        assert_eq!(seed.channels.len(), 1);
        assert_eq!(seed.channels[0].destination["webhook_url"], "https://hooks.example.com/x");
        assert_eq!(seed.monitors.len(), 2);

        let mut monitors = seed.monitors.into_iter();
        let (keyword, channels) = monitors.next().unwrap().into_monitor().unwrap();
        assert_eq!(keyword.monitor_type, MonitorType::Keyword);
        assert_eq!(keyword.keyword_match, Some(KeywordMatch::NotExists));
        assert_eq!(keyword.expected_status, vec!["2xx", "301"]);
        assert_eq!(channels, vec!["ops"]);

        let (dns, _) = monitors.next().unwrap().into_monitor().unwrap();
        assert_eq!(dns.dns_records[0].record_type, "A");
        assert_eq!(dns.max_retries, 3);
    }

    #[test]
    fn test_rejects_unknown_type_and_missing_keyword() {
        let seed = parse(
            r#"
            [[monitors]]
            workspace_id = "00000000-0000-0000-0000-000000000001"
            url = "https://example.com"
            type = "gopher"

            [[monitors]]
            workspace_id = "00000000-0000-0000-0000-000000000001"
            url = "https://example.com"
            type = "keyword"
        "#,
        )
        .unwrap();

        for monitor in seed.monitors {
            assert!(monitor.into_monitor().is_err());
        }
    }
}
