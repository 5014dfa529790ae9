// Human-facing alert delivery
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("platform error ({status}): {body}")]
    Platform { status: u16, body: String },
}

/// A message ready for delivery
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub recipient: String,
    pub action_url: Option<String>,
    pub action_label: Option<String>,
}

/// Delivers notifications to a person
///
/// Failures are returned so the caller can log them; callers never abort a
/// cycle on a delivery failure.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Sink that only writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            "📣 [DRY RUN] {} - {} (URL: {})",
            notification.title,
            notification.message,
            notification.action_url.as_deref().unwrap_or("none")
        );
        Ok(())
    }
}
