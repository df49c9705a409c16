use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::monitoring::types::{CheckDetails, CheckOutcome, CheckStatus, Timings};

/// Raised when a stored tag does not map onto a known enum variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} `{value}`")]
pub struct UnknownTag {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownTag {
    fn new(kind: &'static str, value: &str) -> Self {
        Self { kind, value: value.to_string() }
    }
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $tag,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownTag;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_uppercase().as_str() {
                    $(t if t == $tag.to_ascii_uppercase() => Ok(Self::$variant),)+
                    _ => Err(UnknownTag::new($kind, value)),
                }
            }
        }
    };
}

/// Protocol a monitor is checked with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MonitorType {
    Http,
    Heartbeat,
    Ping,
    Port,
    Dns,
    Keyword,
    AiSynthetic,
    AiHealthCheck,
    DomainSsl,
}

string_enum!(MonitorType, "monitor type", {
    Http => "HTTP",
    Heartbeat => "HEARTBEAT",
    Ping => "PING",
    Port => "PORT",
    Dns => "DNS",
    Keyword => "KEYWORD",
    AiSynthetic => "AI_SYNTHETIC",
    AiHealthCheck => "AI_HEALTH_CHECK",
    DomainSsl => "DOMAIN_SSL",
});

/// Overall health of a monitor as shown to users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Healthy,
    Unhealthy,
    Paused,
    Preparing,
}

string_enum!(MonitorStatus, "monitor status", {
    Healthy => "healthy",
    Unhealthy => "unhealthy",
    Paused => "paused",
    Preparing => "preparing",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeywordMatch {
    Exists,
    NotExists,
}

string_enum!(KeywordMatch, "keyword match type", {
    Exists => "EXISTS",
    NotExists => "NOT_EXISTS",
});

/// What opened an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentKind {
    Failure,
    SlowResponse,
}

string_enum!(IncidentKind, "incident kind", {
    Failure => "FAILURE",
    SlowResponse => "SLOW_RESPONSE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertDirection {
    Failure,
    Recovery,
}

string_enum!(AlertDirection, "alert direction", {
    Failure => "failure",
    Recovery => "recovery",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxState {
    Pending,
    Sent,
    Failed,
}

string_enum!(OutboxState, "outbox state", {
    Pending => "pending",
    Sent => "sent",
    Failed => "failed",
});

/// A single DNS expectation, e.g. `A -> 93.184.216.34`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordExpectation {
    #[serde(rename = "type")]
    pub record_type: String,
    pub value: String,
}

/// Monitor model - represents a monitoring target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: Option<String>,
    pub url: String,
    pub port: Option<u16>,
    pub monitor_type: MonitorType,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub interval_seconds: u32,
    pub timeout_ms: u32,
    pub expected_status: Vec<String>,
    pub keyword: Option<String>,
    pub keyword_match: Option<KeywordMatch>,
    pub dns_records: Vec<DnsRecordExpectation>,
    pub grace_period_seconds: u32,
    pub max_retries: u32,
    pub slow_response_threshold_ms: Option<u32>,
    pub is_active: bool,
    pub status: MonitorStatus,
    pub consecutive_failures: u32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_response_time_ms: Option<u64>,
    pub next_run_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    /// Create a new monitor, due immediately
    pub fn new(workspace_id: Uuid, url: impl Into<String>, monitor_type: MonitorType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            name: None,
            url: url.into(),
            port: None,
            monitor_type,
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            interval_seconds: 60,
            timeout_ms: 5_000,
            expected_status: Vec::new(),
            keyword: None,
            keyword_match: None,
            dns_records: Vec::new(),
            grace_period_seconds: 0,
            max_retries: 3,
            slow_response_threshold_ms: None,
            is_active: true,
            status: MonitorStatus::Preparing,
            consecutive_failures: 0,
            last_checked_at: None,
            last_response_time_ms: None,
            next_run_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(u64::from(self.timeout_ms.max(1)))
    }

    /// Failures needed before an incident opens; zero is treated as one.
    pub fn failure_threshold(&self) -> u32 {
        self.max_retries.max(1)
    }

    /// Name shown in activity messages, falling back to the URL
    pub fn label(&self) -> &str {
        match &self.name {
            Some(name) if !name.is_empty() => name,
            _ => &self.url,
        }
    }
}

/// Light projection used by the scheduler scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueMonitor {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub interval_seconds: u32,
    pub next_run_at: DateTime<Utc>,
}

/// Persisted check history row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRecord {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub status: CheckStatus,
    pub success: bool,
    pub response_time_ms: u64,
    pub timings: Timings,
    pub http_status: Option<u16>,
    pub request_headers: Option<BTreeMap<String, String>>,
    pub response_headers: Option<BTreeMap<String, String>>,
    pub response_body: Option<String>,
    pub response_size_bytes: Option<u64>,
    pub error_message: Option<String>,
    pub details: Option<CheckDetails>,
}

impl CheckRecord {
    /// Build a history row from an executor outcome
    pub fn from_outcome(monitor_id: Uuid, checked_at: DateTime<Utc>, outcome: &CheckOutcome) -> Self {
        let http = outcome.http.as_ref();
        Self {
            id: Uuid::new_v4(),
            monitor_id,
            checked_at,
            status: outcome.status,
            success: outcome.success,
            response_time_ms: outcome.response_time_ms,
            timings: outcome.timings,
            http_status: http.and_then(|h| h.status),
            request_headers: http.map(|h| h.request_headers.clone()),
            response_headers: http.and_then(|h| h.response_headers.clone()),
            response_body: http.and_then(|h| h.body.clone()),
            response_size_bytes: http.and_then(|h| h.size_bytes),
            error_message: outcome.error_message.clone(),
            details: outcome.details.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub workspace_id: Uuid,
    pub kind: IncidentKind,
    pub started_at: DateTime<Utc>,
    pub check_id: Uuid,
    pub resolved_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub resolved_check_id: Option<Uuid>,
    pub reason: String,
}

impl Incident {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// Delivery target kind of an alert channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Email,
    Whatsapp,
    Sms,
    /// Webhook-style provider, keyed by provider id (`slack`, `webhook`, ...)
    Integration(String),
}

impl ChannelType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Email => "email",
            Self::Whatsapp => "whatsapp",
            Self::Sms => "sms",
            Self::Integration(provider) => provider.as_str(),
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = UnknownTag;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" => Err(UnknownTag::new("channel type", value)),
            "email" => Ok(Self::Email),
            "whatsapp" => Ok(Self::Whatsapp),
            "sms" => Ok(Self::Sms),
            _ => Ok(Self::Integration(normalized)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertChannel {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub channel_type: ChannelType,
    /// Opaque destination payload; shape depends on `channel_type`
    pub destination: serde_json::Value,
    /// When false, only monitors subscribed via `monitor_alert_channels` alert here
    pub all_monitors: bool,
    pub created_at: DateTime<Utc>,
}

impl AlertChannel {
    pub fn new(workspace_id: Uuid, channel_type: ChannelType, destination: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            channel_type,
            destination,
            all_monitors: true,
            created_at: Utc::now(),
        }
    }
}

/// Outbox row joined with its channel, ready for delivery
#[derive(Debug, Clone)]
pub struct PendingAlert {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub monitor_id: Uuid,
    pub workspace_id: Uuid,
    pub direction: AlertDirection,
    pub message: String,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub channel: AlertChannel,
}

/// Outbox row as stored, without the joined channel
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub incident_id: Uuid,
    pub channel_id: Uuid,
    pub direction: AlertDirection,
    pub state: OutboxState,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertSent {
    pub id: Uuid,
    pub monitor_id: Uuid,
    pub channel_id: Uuid,
    pub incident_id: Uuid,
    pub direction: AlertDirection,
    pub sent_at: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub action: String,
    pub entity_type: String,
    pub entity_id: Uuid,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub fn new(
        workspace_id: Uuid,
        action: &str,
        entity_type: &str,
        entity_id: Uuid,
        message: String,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id,
            message,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Result of recording an externally received heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatReceipt {
    Recorded,
    NotFound,
    Inactive,
    NotHeartbeat,
}

/// Convert a timestamp to the millisecond integer stored in the database
pub fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Convert a stored millisecond integer back to a timestamp
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_type_round_trip_tags() {
        assert_eq!("AI_HEALTH_CHECK".parse::<MonitorType>(), Ok(MonitorType::AiHealthCheck));
        assert_eq!("http".parse::<MonitorType>(), Ok(MonitorType::Http));
        assert_eq!(MonitorType::DomainSsl.to_string(), "DOMAIN_SSL");
        let err = "SMTP".parse::<MonitorType>().unwrap_err();
        assert_eq!(err.value, "SMTP");
    }

    #[test]
    fn test_channel_type_parsing() {
        assert_eq!("Email".parse::<ChannelType>(), Ok(ChannelType::Email));
        assert_eq!(
            "slack".parse::<ChannelType>(),
            Ok(ChannelType::Integration("slack".to_string()))
        );
        assert!("  ".parse::<ChannelType>().is_err());
    }

    #[test]
    fn test_failure_threshold_never_zero() {
        let mut monitor = Monitor::new(Uuid::new_v4(), "https://example.com", MonitorType::Http);
        monitor.max_retries = 0;
        assert_eq!(monitor.failure_threshold(), 1);
        monitor.max_retries = 3;
        assert_eq!(monitor.failure_threshold(), 3);
    }

    #[test]
    fn test_millis_conversion() {
        let now = from_millis(1_700_000_000_123);
        assert_eq!(to_millis(now), 1_700_000_000_123);
    }
}
