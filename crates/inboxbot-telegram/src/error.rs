//! Error types for the Telegram client.

use inboxbot_scheduler::NotifyError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelegramError {
    /// HTTP request failed. The URL is stripped so the bot token never leaks.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Bot API answered with `ok: false`.
    #[error("Bot API error {code}: {description}")]
    Api { code: u16, description: String },

    /// Telegram asked us to slow down.
    #[error("rate limited by Bot API (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The reply was not the JSON we expected.
    #[error("invalid Bot API response: {0}")]
    InvalidResponse(String),
}

impl TelegramError {
    /// The user blocked the bot or the chat is gone.
    pub fn is_blocked(&self) -> bool {
        matches!(self, TelegramError::Api { code: 403, .. })
    }
}

impl From<TelegramError> for NotifyError {
    fn from(e: TelegramError) -> Self {
        if e.is_blocked() {
            NotifyError::Blocked(e.to_string())
        } else {
            NotifyError::Delivery(e.to_string())
        }
    }
}
