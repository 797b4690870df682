use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::auth::truncate;
use crate::channels::traits::{StatelessTransport, TransportError};
use crate::config::WebhookConfig;
use crate::error::{NotifyError, Result};
use crate::render::RenderedContent;

/// Incoming-webhook channel: one shared room, plain text only.
#[derive(Debug, Clone)]
pub struct WebhookTransport {
    url: String,
    client: reqwest::Client,
}

impl WebhookTransport {
    /// `None` when no webhook url is configured.
    pub fn from_config(config: &WebhookConfig) -> Result<Option<Self>> {
        let Some(url) = config.url.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to build webhook client: {e}")))?;
        Ok(Some(Self {
            url: url.to_owned(),
            client,
        }))
    }
}

#[async_trait]
impl StatelessTransport for WebhookTransport {
    async fn send(&self, content: &RenderedContent) -> std::result::Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({ "text": content.text }))
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }
        Ok(())
    }
}
