//! Minimal Telegram Bot API client.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{TelegramError, TelegramResult};
use crate::types::{ApiResponse, Chat, ChatId, GetChatRequest, GetUpdatesRequest, Update, User};

pub const DEFAULT_API_BASE_URL: &str = "https://api.telegram.org";

/// Extra time allowed on top of a long-poll timeout before the HTTP request
/// itself is abandoned.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Telegram Bot API client.
#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    request_timeout: Duration,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl TelegramClient {
    /// Create a client for `token`.
    ///
    /// # Errors
    /// Returns [`TelegramError::Http`] if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>) -> TelegramResult<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: DEFAULT_API_BASE_URL.to_string(),
            token: token.into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

    /// Builder: point at another Bot API server.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.base_url, self.token)
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> TelegramResult<T> {
        let status = response.status();
        let body = response.text().await?;
        let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => {
                return Err(TelegramError::Api {
                    code: i64::from(status.as_u16()),
                    description: status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_string(),
                    retry_after: None,
                });
            }
            Err(e) => return Err(e.into()),
        };

        match parsed {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                description,
                error_code,
                parameters,
                ..
            } => Err(TelegramError::Api {
                code: error_code.unwrap_or_else(|| i64::from(status.as_u16())),
                description: description.unwrap_or_else(|| "request failed".into()),
                retry_after: parameters.and_then(|p| p.retry_after),
            }),
        }
    }

    async fn call<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
        timeout: Duration,
    ) -> TelegramResult<T> {
        debug!(method, "Telegram API call");
        let response = self
            .http
            .post(self.method_url(method))
            .timeout(timeout)
            .json(body)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Identify the bot behind the token.
    pub async fn get_me(&self) -> TelegramResult<User> {
        debug!(method = "getMe", "Telegram API call");
        let response = self
            .http
            .get(self.method_url("getMe"))
            .timeout(self.request_timeout)
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Look up a chat by id or `@username`.
    pub async fn get_chat(&self, chat_id: ChatId) -> TelegramResult<Chat> {
        self.call("getChat", &GetChatRequest { chat_id }, self.request_timeout)
            .await
    }

    /// Fetch pending updates, long-polling for up to `request.timeout` seconds.
    pub async fn get_updates(&self, request: &GetUpdatesRequest) -> TelegramResult<Vec<Update>> {
        let poll = Duration::from_secs(u64::from(request.timeout.unwrap_or(0)));
        self.call("getUpdates", request, poll + LONG_POLL_GRACE)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let client = TelegramClient::new("123:SECRET").unwrap();
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("SECRET"));
        assert!(rendered.contains("api.telegram.org"));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = TelegramClient::new("t")
            .unwrap()
            .with_base_url("http://localhost:8081/");
        assert_eq!(client.method_url("getMe"), "http://localhost:8081/bott/getMe");
    }
}
