use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::notifier::{Notifier, NotifyError, check_response, destination_field};
use crate::config::WhatsAppConfig;
use crate::database::models::{AlertDirection, PendingAlert};

const GRAPH_API: &str = "https://graph.facebook.com";

/// WhatsApp Cloud API text messages
pub struct WhatsAppNotifier {
    client: Client,
    endpoint: String,
    access_token: String,
}

impl WhatsAppNotifier {
    pub fn new(client: Client, config: &WhatsAppConfig) -> Result<Self, NotifyError> {
        let access_token = config.access_token.clone().ok_or(NotifyError::NotConfigured("whatsapp.access_token"))?;
        if config.phone_number_id.is_empty() {
            return Err(NotifyError::NotConfigured("whatsapp.phone_number_id"));
        }
        Ok(Self {
            client,
            endpoint: format!("{GRAPH_API}/{}/{}/messages", config.api_version, config.phone_number_id),
            access_token,
        })
    }
}

/// Graph API payload for a plain text message
pub fn text_message(recipient: &str, alert: &PendingAlert) -> Value {
    let at = alert.next_attempt_at.to_rfc2822();
    let body = match alert.direction {
        AlertDirection::Failure => format!(
            "Incident Alert\n\nTitle: {}\nReported At: {at}\n\nPlease take the necessary action immediately.",
            alert.message
        ),
        AlertDirection::Recovery => format!(
            "Recovery Notification\n\nTitle: {}\nRecovered At: {at}\n\nThe incident has been resolved and systems are back to normal.",
            alert.message
        ),
    };

    json!({
        "messaging_product": "whatsapp",
        "preview_url": false,
        "recipient_type": "individual",
        "to": recipient,
        "type": "text",
        "text": { "body": body },
    })
}

#[async_trait]
impl Notifier for WhatsAppNotifier {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send(&self, alert: &PendingAlert) -> Result<(), NotifyError> {
        let recipient = destination_field(&alert.channel.destination, "number")?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .json(&text_message(recipient, alert))
            .send()
            .await?;
        check_response(response).await
    }
}
