//! SQLite-backed account records for inboxbot.
//!
//! One row per Telegram chat. The scheduler sees it through
//! [`inboxbot_scheduler::AccountStore`]; the CLI uses the inherent methods to
//! register and manage accounts.

mod db;
mod error;

pub use db::SqliteAccountStore;
pub use error::DbError;
