//! OAuth2 client-credentials tokens with in-memory caching.
//!
//! Both the task source and the bot transport authenticate this way. A token
//! is reused until [`REFRESH_MARGIN`] before its advertised expiry; callers
//! that get a 401/403 call [`TokenCache::invalidate`] and retry once.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;

/// Tokens are refreshed this long before they expire.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Credentials for one token endpoint.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Sent as `scope` when present.
    pub scope: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    /// Network failure or 5xx from the token endpoint.
    #[error("token endpoint unavailable: {0}")]
    Unavailable(String),

    /// The endpoint refused the credentials.
    #[error("token request rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// The endpoint answered without a usable `access_token`.
    #[error("malformed token response: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_after: Instant,
}

/// Cached bearer token for one set of [`ClientCredentials`].
#[derive(Debug)]
pub struct TokenCache {
    credentials: ClientCredentials,
    client: reqwest::Client,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(credentials: ClientCredentials, client: reqwest::Client) -> Self {
        Self {
            credentials,
            client,
            cached: Mutex::new(None),
        }
    }

    /// Return a valid bearer token, fetching a new one when needed.
    pub async fn bearer(&self) -> Result<String, TokenError> {
        if let Some(token) = self.cached_at(Instant::now()) {
            return Ok(token);
        }
        self.fetch().await
    }

    /// Drop the cached token so the next [`bearer`](Self::bearer) call refetches.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }

    fn cached_at(&self, now: Instant) -> Option<String> {
        let cached = self.cached.lock().ok()?;
        cached
            .as_ref()
            .filter(|t| now < t.refresh_after)
            .map(|t| t.value.clone())
    }

    async fn fetch(&self) -> Result<String, TokenError> {
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
        ];
        if let Some(scope) = self.credentials.scope.as_deref() {
            form.push(("scope", scope));
        }

        let response = self
            .client
            .post(&self.credentials.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(TokenError::Unavailable(format!("status {status}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenError::Rejected {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Malformed(e.to_string()))?;
        let value = parsed
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| TokenError::Malformed("missing access_token".into()))?;
        let lifetime = Duration::from_secs(parse_expires_in(parsed.expires_in.as_ref()));

        let refresh_after = Instant::now() + lifetime.saturating_sub(REFRESH_MARGIN);
        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(CachedToken {
                value: value.clone(),
                refresh_after,
            });
        }
        tracing::debug!(
            token_url = %self.credentials.token_url,
            expires_in_secs = lifetime.as_secs(),
            "fetched access token"
        );
        Ok(value)
    }
}

/// `expires_in` arrives as a number or a numeric string depending on the issuer.
fn parse_expires_in(raw: Option<&serde_json::Value>) -> u64 {
    match raw {
        Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        _ => DEFAULT_EXPIRES_IN_SECS,
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
