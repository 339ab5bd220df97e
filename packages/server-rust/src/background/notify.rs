//! Notification delivery back ends.
//!
//! A [`Notifier`] makes exactly one delivery attempt. Retrying is the job of
//! [`DeliveryRetrier`](super::DeliveryRetrier).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulwark_core::User;
use serde::Serialize;
use serde_json::json;
use tracing::info;

/// A message addressed to one recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    /// Template data forwarded to the delivery endpoint as-is.
    pub data: serde_json::Value,
}

impl Notification {
    /// Welcome message sent after a user registers. Carries the activation
    /// token the user must send back to `PUT /v1/users/activated`.
    #[must_use]
    pub fn welcome(user: &User, activation_token: &str) -> Self {
        Self {
            recipient: user.email.clone(),
            subject: "Welcome to Bulwark!".to_string(),
            body: format!(
                "Hi {},\n\nThanks for signing up. Your user ID number is {}.\n\n\
                 To activate your account, send {{\"token\": \"{}\"}} to \
                 PUT /v1/users/activated. The token expires in 3 days.\n",
                user.name, user.id, activation_token
            ),
            data: json!({
                "activationToken": activation_token,
                "userID": user.id,
                "name": user.name,
            }),
        }
    }
}

/// One failed delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("delivery endpoint responded with status {0}")]
    Status(u16),
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Single-attempt delivery of a [`Notification`].
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Settings for choosing and building a notifier.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Endpoint that receives notifications as JSON. `None` logs them instead.
    pub webhook_url: Option<String>,
    /// Sender identity included in every webhook payload.
    pub sender: String,
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            sender: "Bulwark <no-reply@bulwark.local>".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Builds the notifier selected by `config`.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be constructed.
pub fn build_notifier(config: &NotifierConfig) -> Result<Arc<dyn Notifier>, NotifyError> {
    Ok(match &config.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(
            url.clone(),
            config.sender.clone(),
            config.timeout,
        )?),
        None => Arc::new(LogNotifier),
    })
}

/// POSTs notifications as JSON to an HTTP endpoint. Any non-2xx is a failure.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    sender: String,
}

impl WebhookNotifier {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: String, sender: String, timeout: Duration) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            sender,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "from": self.sender,
                "to": notification.recipient,
                "subject": notification.subject,
                "body": notification.body,
                "data": notification.data,
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}

/// Writes notifications to the log. Used when no delivery endpoint is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            recipient = %notification.recipient,
            subject = %notification.subject,
            "notification delivered to log"
        );
        Ok(())
    }
}
