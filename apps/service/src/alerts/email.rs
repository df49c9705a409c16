use std::time::Duration;

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::notifier::{Notifier, NotifyError, destination_field};
use crate::config::SmtpConfig;
use crate::database::models::{AlertDirection, PendingAlert};

pub struct EmailNotifier {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl EmailNotifier {
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::InvalidDestination(format!("smtp.from: {e}")))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotifyError::Transport(e.to_string()))?
            .timeout(Some(timeout));
        if config.port != 0 {
            builder = builder.port(config.port);
        }
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self { from, transport: builder.build() })
    }
}

/// Subject and plain-text body for an alert email
pub fn compose(alert: &PendingAlert) -> (String, String) {
    let at = alert.next_attempt_at.to_rfc2822();
    match alert.direction {
        AlertDirection::Failure => (
            format!("Incident Alert: {}", alert.message),
            format!(
                "Incident Report\n\nTitle: {}\nReported At: {at}\n\nPlease take the necessary action immediately.\n",
                alert.message
            ),
        ),
        AlertDirection::Recovery => (
            format!("Recovery Alert: {}", alert.message),
            format!(
                "Recovery Notification\n\nTitle: {}\nRecovered At: {at}\n\nThe incident has been resolved and systems are back to normal.\n",
                alert.message
            ),
        ),
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, alert: &PendingAlert) -> Result<(), NotifyError> {
        let to = destination_field(&alert.channel.destination, "email")?
            .parse::<Mailbox>()
            .map_err(|e| NotifyError::InvalidDestination(e.to_string()))?;
        let (subject, body) = compose(alert);

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| NotifyError::InvalidDestination(e.to_string()))?;

        self.transport.send(email).await.map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(())
    }
}
