//! Scheduler types.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable account identifier (the Telegram chat id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mailbox login and secret.
///
/// The secret is never printed: `Debug` redacts it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub login: String,
    pub secret: String,
}

impl Credential {
    pub fn new(login: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("login", &self.login)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One user's polling record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Chat the notifications go to.
    pub id: AccountId,
    /// Mailbox credential.
    pub credential: Credential,
    /// Inactive accounts are never selected.
    pub active: bool,
    /// Earliest time this account may be polled again.
    pub next_poll_at: DateTime<Utc>,
    /// Consecutive failed polls since the last success.
    pub failure_count: u32,
    /// When the account was registered.
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// A freshly registered account: active, no failures, eligible now.
    pub fn register(id: AccountId, credential: Credential) -> Self {
        let now = Utc::now();
        Self {
            id,
            credential,
            active: true,
            next_poll_at: now,
            failure_count: 0,
            created_at: now,
        }
    }

    /// Check if this account may be polled at `now`.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.active && self.next_poll_at <= now
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, patch: &AccountPatch) {
        if let Some(next_poll_at) = patch.next_poll_at {
            self.next_poll_at = next_poll_at;
        }
        if let Some(failure_count) = patch.failure_count {
            self.failure_count = failure_count;
        }
        if let Some(active) = patch.active {
            self.active = active;
        }
    }
}

/// Partial update of an account's scheduling fields.
///
/// `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountPatch {
    pub next_poll_at: Option<DateTime<Utc>>,
    pub failure_count: Option<u32>,
    pub active: Option<bool>,
}

impl AccountPatch {
    pub fn next_poll_at(at: DateTime<Utc>) -> Self {
        Self {
            next_poll_at: Some(at),
            ..Self::default()
        }
    }

    pub fn failure_count(count: u32) -> Self {
        Self {
            failure_count: Some(count),
            ..Self::default()
        }
    }

    pub fn active(active: bool) -> Self {
        Self {
            active: Some(active),
            ..Self::default()
        }
    }

    /// Reschedule after a failed poll.
    pub fn reschedule_failure(at: DateTime<Utc>, failure_count: u32) -> Self {
        Self {
            next_poll_at: Some(at),
            failure_count: Some(failure_count),
            active: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.next_poll_at.is_none() && self.failure_count.is_none() && self.active.is_none()
    }
}

/// Attachment metadata. Content is never downloaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: Option<String>,
    pub size: Option<u64>,
}

/// An unread message as reported by the mail backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: Option<String>,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub has_attachments: bool,
    pub attachments: Vec<Attachment>,
}

/// A message to send on behalf of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    /// Local files to attach. Missing files are skipped.
    pub attachments: Vec<PathBuf>,
    /// Keep a copy in Sent Items.
    pub save_to_sent: bool,
}

/// The "new mail" event handed to the notification sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewMailNotice {
    pub account_id: AccountId,
    pub sender: Option<String>,
    pub subject: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub attachment_names: Vec<String>,
}

impl NewMailNotice {
    pub fn from_message(account_id: AccountId, message: &MailMessage) -> Self {
        Self {
            account_id,
            sender: message.sender.clone(),
            subject: message.subject.clone(),
            received_at: message.received_at,
            attachment_names: message
                .attachments
                .iter()
                .map(|a| a.name.clone().unwrap_or_else(|| "unnamed".to_string()))
                .collect(),
        }
    }
}
