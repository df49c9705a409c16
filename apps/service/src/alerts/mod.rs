//! Alert delivery: channel senders and the outbox dispatcher that drains
//! alerts queued by incident transitions.

pub mod dispatcher;
pub mod email;
pub mod integrations;
pub mod notifier;
pub mod whatsapp;

use std::time::Duration;

use async_trait::async_trait;

pub use dispatcher::{AlertDispatcher, DispatchReport};
pub use notifier::{Notifier, NotifyError};

use crate::config::AlertsConfig;
use crate::database::models::{ChannelType, PendingAlert};
use email::EmailNotifier;
use integrations::IntegrationNotifier;
use whatsapp::WhatsAppNotifier;

/// Routes each alert to the sender for its channel type.
///
/// Senders whose configuration is missing are left out; alerts for them fail
/// with `NotifyError::NotConfigured`.
pub struct NotificationService {
    email: Option<EmailNotifier>,
    whatsapp: Option<WhatsAppNotifier>,
    integrations: IntegrationNotifier,
}

impl NotificationService {
    pub fn from_config(config: &AlertsConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_seconds.max(1));
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let email = match &config.smtp {
            Some(smtp) => Some(EmailNotifier::new(smtp, timeout)?),
            None => {
                tracing::warn!("SMTP not configured, email alerts will fail");
                None
            }
        };
        let whatsapp = match &config.whatsapp {
            Some(whatsapp) => Some(WhatsAppNotifier::new(client.clone(), whatsapp)?),
            None => None,
        };

        Ok(Self {
            email,
            whatsapp,
            integrations: IntegrationNotifier::new(client, config.pushover_app_token.clone()),
        })
    }
}

#[async_trait]
impl Notifier for NotificationService {
    fn name(&self) -> &str {
        "notifications"
    }

    async fn send(&self, alert: &PendingAlert) -> Result<(), NotifyError> {
        match &alert.channel.channel_type {
            ChannelType::Email => match &self.email {
                Some(email) => email.send(alert).await,
                None => Err(NotifyError::NotConfigured("alerts.smtp")),
            },
            ChannelType::Whatsapp => match &self.whatsapp {
                Some(whatsapp) => whatsapp.send(alert).await,
                None => Err(NotifyError::NotConfigured("alerts.whatsapp")),
            },
            ChannelType::Sms => Err(NotifyError::Unsupported("sms".into())),
            ChannelType::Integration(_) => self.integrations.send(alert).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{AlertChannel, AlertDirection};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn alert(channel_type: ChannelType) -> PendingAlert {
        let workspace_id = Uuid::new_v4();
        PendingAlert {
            id: Uuid::new_v4(),
            incident_id: Uuid::new_v4(),
            monitor_id: Uuid::new_v4(),
            workspace_id,
            direction: AlertDirection::Failure,
            message: "Monitor DOWN: https://example.com".into(),
            attempts: 0,
            next_attempt_at: Utc::now(),
            channel: AlertChannel::new(workspace_id, channel_type, json!({})),
        }
    }

    #[tokio::test]
    async fn test_unconfigured_senders_fail_permanently() {
        let service = NotificationService::from_config(&AlertsConfig::default()).unwrap();

        for channel_type in [ChannelType::Email, ChannelType::Whatsapp, ChannelType::Sms] {
            let err = service.send(&alert(channel_type)).await.unwrap_err();
            assert!(err.is_permanent(), "{err}");
        }
    }

    #[tokio::test]
    async fn test_integration_with_bad_destination_is_permanent() {
        let service = NotificationService::from_config(&AlertsConfig::default()).unwrap();
        let err = service.send(&alert(ChannelType::Integration("slack".into()))).await.unwrap_err();
        assert!(matches!(err, NotifyError::InvalidDestination(_)));
    }
}
