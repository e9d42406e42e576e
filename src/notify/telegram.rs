use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::error;

use super::Notifier;
use crate::bot::retry::RetryPolicy;

/// Telegram Bot API sink.
pub struct TelegramNotifier {
    http: Client,
    /// Full sendMessage URL; contains the bot token, so never logged.
    endpoint: String,
    chat_id: String,
    retry: RetryPolicy,
}

impl TelegramNotifier {
    pub fn new(token: &str, chat_id: &str, retry: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(TelegramNotifier {
            http,
            endpoint: format!("https://api.telegram.org/bot{}/sendMessage", token),
            chat_id: chat_id.to_string(),
            retry,
        })
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str) -> bool {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        for attempt in 0..self.retry.max_attempts {
            match self.http.post(&self.endpoint).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => return true,
                Ok(resp) => {
                    let status = resp.status();
                    let detail = resp.text().await.unwrap_or_default();
                    error!(
                        "Telegram error (attempt {}): {} - {}",
                        attempt + 1,
                        status,
                        detail
                    );
                }
                Err(e) => {
                    // reqwest errors can embed the request URL, which holds the token
                    error!(
                        "Network error sending Telegram message (attempt {}): {}",
                        attempt + 1,
                        e.without_url()
                    );
                }
            }

            if !self.retry.is_last(attempt) {
                tokio::time::sleep(self.retry.delay_for(attempt)).await;
            }
        }
        false
    }

    fn name(&self) -> &str {
        "telegram"
    }
}
