use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use url::Url;

use crate::auth::{ClientCredentials, TokenCache, TokenError, truncate};
use crate::channels::sessions::{ConversationReference, SessionRegistry};
use crate::channels::traits::{StatefulTransport, TransportError};
use crate::config::BotConfig;
use crate::error::{NotifyError, Result};
use crate::render::RenderedContent;

const ADAPTIVE_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";

/// Proactive Bot Framework messaging to responsibles with a captured session.
pub struct BotTransport {
    app_id: String,
    registry: SessionRegistry,
    token: TokenCache,
    client: reqwest::Client,
}

impl BotTransport {
    pub fn new(config: &BotConfig, registry: SessionRegistry) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to build bot client: {e}")))?;
        let token = TokenCache::new(
            ClientCredentials {
                token_url: config.token_url.clone(),
                client_id: config.app_id.clone(),
                client_secret: config.app_password.clone(),
                scope: Some(config.scope.clone()),
            },
            client.clone(),
        );
        Ok(Self {
            app_id: config.app_id.clone(),
            registry,
            token,
            client,
        })
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn activities_url(reference: &ConversationReference) -> std::result::Result<Url, TransportError> {
        let mut url = Url::parse(&reference.service_url)
            .map_err(|e| TransportError::Http(format!("invalid service url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| TransportError::Http("service url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["v3", "conversations", reference.conversation.id.as_str(), "activities"]);
        Ok(url)
    }

    fn activity(&self, reference: &ConversationReference, content: &RenderedContent) -> Value {
        let from = reference
            .bot
            .as_ref()
            .map_or_else(|| json!({"id": self.app_id}), |bot| json!({"id": bot.id}));
        let mut activity = json!({
            "type": "message",
            "from": from,
            "conversation": {"id": reference.conversation.id},
            "text": content.text,
        });
        if let Some(user) = reference.user.as_ref() {
            activity["recipient"] = json!({"id": user.id});
        }
        if let Some(card) = content.card.as_ref() {
            activity["attachments"] = json!([{
                "contentType": ADAPTIVE_CARD_CONTENT_TYPE,
                "content": card
            }]);
        }
        activity
    }
}

fn token_error(err: TokenError) -> TransportError {
    match err {
        TokenError::Rejected { status, body } => TransportError::Rejected { status, body },
        TokenError::Unavailable(msg) | TokenError::Malformed(msg) => TransportError::Http(msg),
    }
}

#[async_trait]
impl StatefulTransport for BotTransport {
    fn has_session(&self, responsible: &str) -> bool {
        self.registry.contains(responsible)
    }

    async fn send(
        &self,
        responsible: &str,
        content: &RenderedContent,
    ) -> std::result::Result<(), TransportError> {
        let reference = self
            .registry
            .lookup(responsible)
            .ok_or_else(|| TransportError::NoSession(responsible.to_owned()))?;
        let url = Self::activities_url(reference)?;
        let activity = self.activity(reference, content);

        let mut refreshed = false;
        loop {
            let token = self.token.bearer().await.map_err(token_error)?;
            let response = self
                .client
                .post(url.clone())
                .bearer_auth(&token)
                .json(&activity)
                .send()
                .await
                .map_err(|e| TransportError::Http(e.to_string()))?;
            let status = response.status();
            if status.is_success() {
                tracing::debug!(
                    responsible,
                    recipient = self.registry.recipient_for(responsible),
                    "bot message delivered"
                );
                return Ok(());
            }
            if (status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN) && !refreshed {
                self.token.invalidate();
                refreshed = true;
                continue;
            }
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }
    }
}
