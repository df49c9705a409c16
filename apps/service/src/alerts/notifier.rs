use async_trait::async_trait;
use thiserror::Error;

use crate::database::models::PendingAlert;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    #[error("no sender for channel type {0}")]
    Unsupported(String),
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("delivery failed: {0}")]
    Transport(String),
    #[error("provider rejected the alert with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl NotifyError {
    /// Retrying cannot help; the dispatcher gives up on the row immediately
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidDestination(_) | Self::Unsupported(_) | Self::NotConfigured(_))
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// Delivers one queued alert to its channel
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, alert: &PendingAlert) -> Result<(), NotifyError>;
}

/// Read a required string field from a channel destination
pub(crate) fn destination_field<'a>(
    destination: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, NotifyError> {
    destination
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| NotifyError::InvalidDestination(format!("missing \"{field}\"")))
}

/// Turn a non-2xx response into `NotifyError::Rejected`
pub(crate) async fn check_response(response: reqwest::Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Rejected { status: status.as_u16(), body: body.chars().take(500).collect() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_destination_field() {
        let destination = json!({ "email": " ops@example.com ", "empty": "" });
        assert_eq!(destination_field(&destination, "email").unwrap(), "ops@example.com");
        assert!(matches!(destination_field(&destination, "empty"), Err(NotifyError::InvalidDestination(_))));
        assert!(destination_field(&destination, "number").is_err());
    }

    #[test]
    fn test_permanent_errors() {
        assert!(NotifyError::Unsupported("sms".into()).is_permanent());
        assert!(NotifyError::NotConfigured("smtp").is_permanent());
        assert!(!NotifyError::Transport("reset".into()).is_permanent());
        assert!(!NotifyError::Rejected { status: 500, body: String::new() }.is_permanent());
    }
}
