//! Webhook-style providers. Each provider maps an alert onto one HTTP POST;
//! the request is built as plain data so the mapping can be tested without a
//! network.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::{Value, json};

use super::notifier::{Notifier, NotifyError, check_response, destination_field};
use crate::database::models::{AlertDirection, ChannelType, PendingAlert};

pub const PROVIDERS: [&str; 12] = [
    "slack",
    "discord",
    "telegram",
    "webhook",
    "googlechat",
    "msteams",
    "mattermost",
    "zapier",
    "splunk",
    "pagerduty",
    "pushover",
    "pushbullet",
];

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl IntegrationRequest {
    fn json(url: impl Into<String>, body: Value) -> Self {
        Self { url: url.into(), headers: Vec::new(), body: RequestBody::Json(body) }
    }
}

/// Event name sent to generic webhooks
pub fn event_name(direction: AlertDirection) -> &'static str {
    match direction {
        AlertDirection::Failure => "monitor.down",
        AlertDirection::Recovery => "monitor.recovered",
    }
}

/// Build the outgoing request for `provider`
pub fn build_request(
    provider: &str,
    alert: &PendingAlert,
    pushover_app_token: Option<&str>,
    now: DateTime<Utc>,
) -> Result<IntegrationRequest, NotifyError> {
    let destination = &alert.channel.destination;
    let direction = alert.direction;
    let message = alert.message.as_str();
    let webhook_url = || destination_field(destination, "webhook_url");

    let request = match provider {
        "slack" | "googlechat" | "msteams" | "mattermost" => {
            IntegrationRequest::json(webhook_url()?, json!({ "text": message }))
        }
        "discord" => IntegrationRequest::json(webhook_url()?, json!({ "content": message })),
        "zapier" => IntegrationRequest::json(webhook_url()?, json!({ "message": message })),
        "splunk" => IntegrationRequest::json(webhook_url()?, json!({ "event": message })),
        "telegram" => {
            let token = destination_field(destination, "bot_token")?;
            let chat_id = destination_field(destination, "chat_id")?;
            IntegrationRequest::json(
                format!("https://api.telegram.org/bot{token}/sendMessage"),
                json!({ "chat_id": chat_id, "text": message }),
            )
        }
        "webhook" => {
            let mut request = IntegrationRequest::json(
                webhook_url()?,
                json!({
                    "event": event_name(direction),
                    "message": message,
                    "timestamp": now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                }),
            );
            request.headers = custom_headers(destination)?;
            request
        }
        "pushover" => {
            let token = pushover_app_token.ok_or(NotifyError::NotConfigured("alerts.pushover_app_token"))?;
            let user = destination_field(destination, "user_key")?;
            IntegrationRequest {
                url: "https://api.pushover.net/1/messages.json".into(),
                headers: Vec::new(),
                body: RequestBody::Form(vec![
                    ("token".into(), token.into()),
                    ("user".into(), user.into()),
                    ("message".into(), message.into()),
                ]),
            }
        }
        "pushbullet" => {
            let token = destination_field(destination, "access_token")?;
            let mut request = IntegrationRequest::json(
                "https://api.pushbullet.com/v2/pushes",
                json!({ "type": "note", "title": "Notification", "body": message }),
            );
            request.headers.push(("Access-Token".into(), token.into()));
            request
        }
        "pagerduty" => {
            let routing_key = destination_field(destination, "integration_key")?;
            let event_action = match direction {
                AlertDirection::Failure => "trigger",
                AlertDirection::Recovery => "resolve",
            };
            IntegrationRequest::json(
                "https://events.pagerduty.com/v2/enqueue",
                json!({
                    "routing_key": routing_key,
                    "event_action": event_action,
                    "dedup_key": alert.incident_id.to_string(),
                    "payload": {
                        "summary": message,
                        "severity": "info",
                        "source": "notification-service",
                    },
                }),
            )
        }
        other => return Err(NotifyError::Unsupported(other.to_string())),
    };

    Ok(request)
}

/// `custom_headers` may be a JSON object or a string holding one
fn custom_headers(destination: &Value) -> Result<Vec<(String, String)>, NotifyError> {
    let parsed;
    let object = match destination.get("custom_headers") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(raw)) if raw.trim().is_empty() => return Ok(Vec::new()),
        Some(Value::String(raw)) => {
            parsed = serde_json::from_str::<Value>(raw)
                .map_err(|e| NotifyError::InvalidDestination(format!("custom_headers: {e}")))?;
            &parsed
        }
        Some(value) => value,
    };

    let map = object
        .as_object()
        .ok_or_else(|| NotifyError::InvalidDestination("custom_headers must be an object".into()))?;
    Ok(map
        .iter()
        .map(|(name, value)| {
            let value = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            (name.clone(), value)
        })
        .collect())
}

pub struct IntegrationNotifier {
    client: Client,
    pushover_app_token: Option<String>,
}

impl IntegrationNotifier {
    pub fn new(client: Client, pushover_app_token: Option<String>) -> Self {
        Self { client, pushover_app_token }
    }
}

#[async_trait]
impl Notifier for IntegrationNotifier {
    fn name(&self) -> &str {
        "integration"
    }

    async fn send(&self, alert: &PendingAlert) -> Result<(), NotifyError> {
        let ChannelType::Integration(provider) = &alert.channel.channel_type else {
            return Err(NotifyError::Unsupported(alert.channel.channel_type.to_string()));
        };
        let request = build_request(provider, alert, self.pushover_app_token.as_deref(), Utc::now())?;

        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match &request.body {
            RequestBody::Json(body) => builder.json(body),
            RequestBody::Form(fields) => builder.form(fields),
        };

        check_response(builder.send().await?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::AlertChannel;
    use uuid::Uuid;

    fn alert(provider: &str, destination: Value, direction: AlertDirection, message: &str) -> PendingAlert {
        let workspace_id = Uuid::new_v4();
        PendingAlert {
            id: Uuid::new_v4(),
            incident_id: Uuid::new_v4(),
            monitor_id: Uuid::new_v4(),
            workspace_id,
            direction,
            message: message.into(),
            attempts: 0,
            next_attempt_at: Utc::now(),
            channel: AlertChannel::new(workspace_id, ChannelType::Integration(provider.into()), destination),
        }
    }

    fn build(provider: &str, destination: Value) -> Result<IntegrationRequest, NotifyError> {
        let alert = alert(provider, destination, AlertDirection::Failure, "Monitor DOWN: https://example.com");
        build_request(provider, &alert, None, Utc::now())
    }

    #[test]
    fn test_text_webhooks() {
        for provider in ["slack", "googlechat", "msteams", "mattermost"] {
            let request = build(provider, json!({ "webhook_url": "https://hooks.example.com/x" })).unwrap();
            assert_eq!(request.url, "https://hooks.example.com/x");
            assert_eq!(request.body, RequestBody::Json(json!({ "text": "Monitor DOWN: https://example.com" })));
        }

        let discord = build("discord", json!({ "webhook_url": "https://discord.example/x" })).unwrap();
        assert_eq!(discord.body, RequestBody::Json(json!({ "content": "Monitor DOWN: https://example.com" })));
    }

    #[test]
    fn test_telegram_url_and_chat() {
        let request = build("telegram", json!({ "bot_token": "abc", "chat_id": "42" })).unwrap();
        assert_eq!(request.url, "https://api.telegram.org/botabc/sendMessage");
        assert_eq!(
            request.body,
            RequestBody::Json(json!({ "chat_id": "42", "text": "Monitor DOWN: https://example.com" }))
        );
    }

    #[test]
    fn test_webhook_event_and_custom_headers() {
        let request = build(
            "webhook",
            json!({
                "webhook_url": "https://example.com/hook",
                "custom_headers": "{\"X-Token\": \"secret\"}",
            }),
        )
        .unwrap();
        assert_eq!(request.headers, vec![("X-Token".to_string(), "secret".to_string())]);
        let RequestBody::Json(body) = request.body else { panic!("expected json body") };
        assert_eq!(body["event"], "monitor.down");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));

        let bad = build("webhook", json!({ "webhook_url": "https://example.com/hook", "custom_headers": "nope" }));
        assert!(matches!(bad, Err(NotifyError::InvalidDestination(_))));
    }

    #[test]
    fn test_pushover_needs_app_token() {
        let pending = alert("pushover", json!({ "user_key": "u1" }), AlertDirection::Failure, "down");
        assert!(matches!(
            build_request("pushover", &pending, None, Utc::now()),
            Err(NotifyError::NotConfigured(_))
        ));

        let request = build_request("pushover", &pending, Some("app"), Utc::now()).unwrap();
        assert_eq!(
            request.body,
            RequestBody::Form(vec![
                ("token".into(), "app".into()),
                ("user".into(), "u1".into()),
                ("message".into(), "down".into()),
            ])
        );
    }

    #[test]
    fn test_pagerduty_resolves_on_recovery() {
        let pending = alert(
            "pagerduty",
            json!({ "integration_key": "rk" }),
            AlertDirection::Recovery,
            "Monitor RECOVERED: https://example.com",
        );
        let request = build_request("pagerduty", &pending, None, Utc::now()).unwrap();
        let RequestBody::Json(body) = request.body else { panic!("expected json body") };
        assert_eq!(body["routing_key"], "rk");
        assert_eq!(body["event_action"], "resolve");
        assert_eq!(body["dedup_key"], pending.incident_id.to_string());
    }

    #[test]
    fn test_missing_credentials_and_unknown_provider() {
        assert!(matches!(build("slack", json!({})), Err(NotifyError::InvalidDestination(_))));
        assert!(matches!(build("carrier-pigeon", json!({})), Err(NotifyError::Unsupported(_))));
    }

    #[test]
    fn test_every_provider_is_known() {
        for provider in PROVIDERS {
            let result = build(provider, json!({}));
            assert!(!matches!(result, Err(NotifyError::Unsupported(_))), "{provider}");
        }
    }
}
