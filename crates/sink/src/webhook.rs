use std::time::Duration;

use reqwest::Client;
use slacklog_core::error::{Result, SlacklogError};
use slacklog_core::format::to_json;
use slacklog_core::model::message::OutgoingMessage;

/// One connection pool shared by every flush of a dispatcher.
#[derive(Debug, Clone)]
pub struct WebhookClient {
    client: Client,
    url: String,
}

impl WebhookClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SlacklogError::Config(format!("failed to build webhook client: {e}")))?;
        Ok(Self {
            client,
            url: url.trim().to_string(),
        })
    }

    /// Single attempt. Callers decide what a failure means.
    pub async fn post(&self, message: &OutgoingMessage) -> Result<()> {
        let body = to_json(message)?;
        let resp = self
            .client
            .post(&self.url)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SlacklogError::Delivery(format!("webhook request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SlacklogError::Delivery(format!(
                "webhook responded with status {status}"
            )));
        }
        Ok(())
    }
}
