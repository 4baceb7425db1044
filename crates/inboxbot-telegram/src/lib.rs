//! Telegram notifications for inboxbot.

mod client;
mod error;
pub mod format;

pub use client::{DEFAULT_API_BASE, TelegramClient, TelegramConfig};
pub use error::TelegramError;
