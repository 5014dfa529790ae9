use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::notify::{Notification, NotificationSink, NotifyError};

pub const PUSHOVER_API_BASE: &str = "https://api.pushover.net";
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Form body for POST /1/messages.json
#[derive(Serialize)]
struct PushoverMessage<'a> {
    token: &'a str,
    user: &'a str,
    title: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    url_title: Option<&'a str>,
}

/// Pushover notification client
pub struct PushoverClient {
    client: Client,
    base_url: String,
    app_token: String,
}

impl PushoverClient {
    pub fn new(app_token: String) -> Self {
        Self::with_base_url(PUSHOVER_API_BASE, app_token)
    }

    pub fn with_base_url(base_url: &str, app_token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            app_token,
        }
    }
}

#[async_trait]
impl NotificationSink for PushoverClient {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let url = format!("{}/1/messages.json", self.base_url);

        let payload = PushoverMessage {
            token: &self.app_token,
            user: &notification.recipient,
            title: &notification.title,
            message: &notification.message,
            url: notification.action_url.as_deref(),
            url_title: notification.action_label.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .form(&payload)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Platform {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(
            "Push notification sent: {} - {} (URL: {})",
            notification.title,
            notification.message,
            notification.action_url.as_deref().unwrap_or("none")
        );

        Ok(())
    }
}
