//! Operator notifications
//!
//! Renders [`NotificationEvent`]s as interactive webhook cards and delivers them.
//! Delivery failures never reach the workflow: [`NotificationDispatcher`] logs and
//! swallows them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use trafficguard_shared::{Account, NotificationEvent, NotificationKind};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Webhook rejected message: {0}")]
    WebhookFailed(String),
    #[error("No webhook configured for account {0}")]
    NotConfigured(i64),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, account: &Account, event: &NotificationEvent) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookPayload {
    pub msg_type: String,
    pub card: Card,
}

#[derive(Debug, Clone, Serialize)]
pub struct Card {
    pub config: CardConfig,
    pub header: CardHeader,
    pub elements: Vec<CardElement>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardConfig {
    pub wide_screen_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardHeader {
    pub title: CardText,
    /// Header color
    pub template: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardText {
    pub tag: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardElement {
    pub tag: String,
    pub fields: Vec<CardField>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CardField {
    pub is_short: bool,
    pub text: CardText,
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    msg: Option<String>,
}

impl WebhookPayload {
    pub fn from_event(account: &Account, event: &NotificationEvent) -> Self {
        let kind = event.kind();
        let (title, color) = match kind {
            NotificationKind::TrafficWarning => ("Traffic warning", "orange"),
            NotificationKind::ShutdownRequested => ("Shutdown requested", "red"),
            NotificationKind::ShutdownSucceeded => ("Shutdown succeeded", "green"),
            NotificationKind::ShutdownFailed => ("Shutdown failed", "red"),
            NotificationKind::ShutdownDelayed => ("Shutdown delayed", "yellow"),
        };

        let mut facts = vec![("template".to_string(), kind.template_name().to_string())];
        facts.push(("account".to_string(), account.name.clone()));
        if let Value::Object(map) = event.fields() {
            for (key, value) in map {
                if key == "account_name" {
                    continue;
                }
                facts.push((key, render_value(&value)));
            }
        }

        let elements = facts
            .into_iter()
            .map(|(key, value)| CardElement {
                tag: "div".to_string(),
                fields: vec![CardField {
                    is_short: true,
                    text: CardText {
                        tag: "lark_md".to_string(),
                        content: format!("**{}**\n{}", key, value),
                    },
                }],
            })
            .collect();

        Self {
            msg_type: "interactive".to_string(),
            card: Card {
                config: CardConfig { wide_screen_mode: true },
                header: CardHeader {
                    title: CardText {
                        tag: "plain_text".to_string(),
                        content: format!("{} - {}", title, account.name),
                    },
                    template: color.to_string(),
                },
                elements,
            },
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{:.2}", f),
            _ => n.to_string(),
        },
        Value::Array(items) => items
            .iter()
            .map(|item| match item.get("name").and_then(Value::as_str) {
                Some(name) => name.to_string(),
                None => render_value(item),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Posts cards to the account's webhook, falling back to a default one.
pub struct WebhookNotifier {
    client: reqwest::Client,
    default_webhook: Option<String>,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration, default_webhook: Option<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::RequestFailed(e.to_string()))?;
        Ok(Self {
            client,
            default_webhook,
        })
    }

    pub async fn send_webhook(&self, webhook_url: &str, payload: &WebhookPayload) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(webhook_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| NotifyError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(NotifyError::WebhookFailed(format!("Status: {}, Body: {}", status, body)));
        }

        // A 200 with a non-zero code is still a rejection
        if let Ok(parsed) = serde_json::from_str::<WebhookResponse>(&body) {
            if parsed.code != 0 {
                return Err(NotifyError::WebhookFailed(format!(
                    "code={}, msg={}",
                    parsed.code,
                    parsed.msg.unwrap_or_default()
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, account: &Account, event: &NotificationEvent) -> Result<(), NotifyError> {
        let webhook = account
            .webhook_url
            .as_deref()
            .or(self.default_webhook.as_deref())
            .ok_or(NotifyError::NotConfigured(account.id))?;

        let payload = WebhookPayload::from_event(account, event);
        self.send_webhook(webhook, &payload).await?;
        info!(account_id = account.id, kind = event.kind().as_str(), "Notification sent");
        Ok(())
    }
}

/// Gates events on the policy flag and swallows delivery errors.
#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Returns whether the event was delivered.
    pub async fn dispatch(&self, account: &Account, enabled: bool, event: NotificationEvent) -> bool {
        if !enabled {
            debug!(account_id = account.id, kind = event.kind().as_str(), "Notifications disabled, skipping");
            return false;
        }

        match self.notifier.send(account, &event).await {
            Ok(()) => true,
            Err(e) => {
                warn!(account_id = account.id, kind = event.kind().as_str(), "Notification failed: {}", e);
                false
            }
        }
    }
}
