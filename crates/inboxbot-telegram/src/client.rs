//! Telegram Bot API client.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use inboxbot_scheduler::{AccountId, NewMailNotice, NotificationSink, NotifyError};

use crate::TelegramError;
use crate::format::render_notice;

/// Public Bot API host.
pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Bot credentials and endpoint.
#[derive(Clone)]
pub struct TelegramConfig {
    pub token: String,
    /// Bot API base URL, without the `/bot<token>` part.
    pub api_base: String,
    pub request_timeout: Duration,
}

impl TelegramConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("token", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    error_code: Option<u16>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

/// Sends notices to Telegram chats. The account id is the chat id.
pub struct TelegramClient {
    http: Client,
    send_url: String,
}

impl TelegramClient {
    /// Create a new client.
    pub fn new(config: &TelegramConfig) -> Result<Self, TelegramError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            send_url: format!(
                "{}/bot{}/sendMessage",
                config.api_base.trim_end_matches('/'),
                config.token
            ),
        })
    }

    /// Send a plain-text message to a chat.
    #[tracing::instrument(skip(self, text), fields(chars = text.chars().count()))]
    pub async fn send_text(&self, chat_id: i64, text: &str) -> Result<(), TelegramError> {
        let response = self
            .http
            .post(&self.send_url)
            .json(&SendMessage {
                chat_id,
                text,
                disable_web_page_preview: true,
            })
            .send()
            .await
            .map_err(|e| TelegramError::Http(e.without_url()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TelegramError::Http(e.without_url()))?;

        let parsed: ApiResponse = serde_json::from_str(&body).map_err(|e| {
            TelegramError::InvalidResponse(format!("HTTP {}: {}", status.as_u16(), e))
        })?;

        if parsed.ok && status.is_success() {
            debug!("message delivered");
            return Ok(());
        }

        let code = parsed.error_code.unwrap_or(status.as_u16());
        if code == 429 {
            let retry_after_secs = parsed.parameters.and_then(|p| p.retry_after);
            warn!(?retry_after_secs, "Bot API rate limit hit");
            return Err(TelegramError::RateLimited { retry_after_secs });
        }

        Err(TelegramError::Api {
            code,
            description: parsed.description.unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[async_trait]
impl NotificationSink for TelegramClient {
    async fn notify(&self, account_id: AccountId, notice: &NewMailNotice) -> Result<(), NotifyError> {
        let text = render_notice(notice);
        Ok(self.send_text(account_id.0, &text).await?)
    }
}
