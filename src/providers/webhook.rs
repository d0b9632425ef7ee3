use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ReminderBotError, Result};
use crate::interfaces::delivery::Deliverer;

#[derive(Serialize)]
struct WebhookPayload<'a> {
    owner_id: &'a str,
    message: &'a str,
}

/// POSTs `{"owner_id", "message"}` as JSON to a fixed URL. Any non-2xx
/// answer counts as a failed delivery.
pub struct WebhookDeliverer {
    client: reqwest::Client,
    url: String,
}

impl WebhookDeliverer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ReminderBotError::Config(format!(
                "webhook url must be http(s): {url}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReminderBotError::Http(e.to_string()))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Deliverer for WebhookDeliverer {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, owner_id: &str, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&WebhookPayload { owner_id, message })
            .send()
            .await
            .map_err(|e| ReminderBotError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(url = %self.url, status = status.as_u16(), "webhook rejected reminder");
            return Err(ReminderBotError::Delivery(format!(
                "webhook answered {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }
        debug!(url = %self.url, status = status.as_u16(), owner_id, "webhook accepted reminder");
        Ok(())
    }
}
