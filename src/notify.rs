//! Operator notifications: Telegram transport and the channel pump.
//!
//! Producers push plain strings into a bounded channel; a single pump task
//! forwards them to the [`Notifier`]. The channel capacity of 1 keeps the
//! queue effectively synchronous, so a stalled notifier backpressures scans
//! instead of silently dropping messages.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::{ExposeSecret as _, SecretString};
use thiserror::Error as ThisError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, ThisError)]
pub enum NotifyError {
    #[error("notifier returned status code {0}")]
    UnexpectedStatus(u16),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// Fan-out transport delivering one message to all configured recipients.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Telegram Bot API notifier. Per-recipient failures are logged and do not
/// abort delivery to the remaining recipients.
pub struct TelegramNotifier {
    http: reqwest::Client,
    token: Arc<SecretString>,
    recipients: Vec<i64>,
}

impl TelegramNotifier {
    /// # Errors
    ///
    /// Returns the underlying error if the HTTP client cannot be constructed.
    pub fn new(token: Arc<SecretString>, recipients: Vec<i64>) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            token,
            recipients,
        })
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.token.expose_secret()
        );
        for chat_id in &self.recipients {
            let result = self
                .http
                .post(&url)
                .json(&serde_json::json!({ "chat_id": chat_id, "text": message }))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    debug!(chat_id, "notification delivered");
                }
                Ok(response) => {
                    warn!(chat_id, status = %response.status(), "telegram rejected notification");
                }
                Err(e) => {
                    warn!(chat_id, error = %e, "failed to send telegram notification");
                }
            }
        }
        Ok(())
    }
}

/// Drain `notifications` until the channel closes, forwarding each message.
///
/// Notifier failures are logged and never stop the pump; the supervisor awaits
/// this task during shutdown so queued messages are flushed.
pub async fn pump(mut notifications: mpsc::Receiver<String>, notifier: Arc<dyn Notifier>) {
    while let Some(message) = notifications.recv().await {
        if let Err(e) = notifier.send(&message).await {
            warn!(error = %e, "failed to deliver notification");
        }
    }
    info!("notification pump stopped");
}
