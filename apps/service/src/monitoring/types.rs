use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::UnknownTag;

/// Status of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Up,
    Down,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Up => write!(f, "UP"),
            CheckStatus::Down => write!(f, "DOWN"),
        }
    }
}

impl std::str::FromStr for CheckStatus {
    type Err = UnknownTag;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "UP" => Ok(CheckStatus::Up),
            "DOWN" => Ok(CheckStatus::Down),
            other => Err(UnknownTag { kind: "check status", value: other.to_string() }),
        }
    }
}

/// Phase timings captured while running a check, in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timings {
    pub dns_lookup_ms: Option<u64>,
    pub connect_ms: Option<u64>,
    pub download_ms: Option<u64>,
}

/// HTTP request/response data kept with a check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpDetails {
    pub status: Option<u16>,
    pub request_headers: BTreeMap<String, String>,
    pub response_headers: Option<BTreeMap<String, String>>,
    /// Truncated to the first 5000 characters
    pub body: Option<String>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecordResult {
    pub record_type: String,
    pub expected: String,
    pub matched: bool,
    pub values: Vec<String>,
}

/// Protocol specific fields, stored as JSON with the check row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckDetails {
    Dns {
        records: Vec<DnsRecordResult>,
    },
    Ping {
        packets_sent: u32,
        packet_loss_percent: Option<f64>,
        min_ms: Option<f64>,
        avg_ms: Option<f64>,
        max_ms: Option<f64>,
    },
    Port {
        host: String,
        port: u16,
        connected: bool,
    },
    DomainSsl {
        domain_expires_at: Option<DateTime<Utc>>,
        certificate_expires_at: Option<DateTime<Utc>>,
        issuer: Option<String>,
        domain_error: Option<String>,
        certificate_error: Option<String>,
    },
}

/// Normalized result produced by every executor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub status: CheckStatus,
    pub success: bool,
    pub response_time_ms: u64,
    pub error_message: Option<String>,
    pub timings: Timings,
    pub http: Option<HttpDetails>,
    pub details: Option<CheckDetails>,
}

impl CheckOutcome {
    /// Create a successful outcome
    pub fn success(response_time_ms: u64) -> Self {
        Self {
            status: CheckStatus::Up,
            success: true,
            response_time_ms,
            error_message: None,
            timings: Timings::default(),
            http: None,
            details: None,
        }
    }

    /// Create a failed outcome with an error message
    pub fn failure(response_time_ms: u64, error: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Down,
            success: false,
            response_time_ms,
            error_message: Some(error.into()),
            timings: Timings::default(),
            http: None,
            details: None,
        }
    }

    /// Pick success or failure based on an optional error
    pub fn from_error(response_time_ms: u64, error: Option<String>) -> Self {
        match error {
            None => Self::success(response_time_ms),
            Some(error) => Self::failure(response_time_ms, error),
        }
    }

    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_http(mut self, http: HttpDetails) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_details(mut self, details: CheckDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Whether a successful check exceeded the given latency threshold
    pub fn is_slow(&self, threshold_ms: Option<u32>) -> bool {
        match threshold_ms {
            Some(threshold) if threshold > 0 => {
                self.success && self.response_time_ms > u64::from(threshold)
            }
            _ => false,
        }
    }
}
