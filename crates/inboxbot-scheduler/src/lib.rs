//! Mailbox polling scheduler for inboxbot.
//!
//! This crate provides the scheduling core that:
//! - Picks the active account with the earliest `next_poll_at`
//! - Advances that account's schedule before calling the mail backend
//! - Paces accounts round-robin so aggregate backend load stays flat
//! - Backs off per account on failure (flat for rate limiting, exponential otherwise)
//! - Hands new-mail notices to a notification sink
//!
//! Storage, the mail backend and the notification channel are injected
//! through the traits in [`ports`].

mod error;
pub mod policy;
pub mod ports;
mod scheduler;
pub mod selector;
mod types;

pub use error::{BackendError, ErrorClass, NotifyError, StoreError};
pub use policy::SchedulerConfig;
pub use ports::{AccountStore, MailBackend, NotificationSink};
pub use scheduler::{PollOutcome, Scheduler, Step};
pub use types::{
    Account, AccountId, AccountPatch, Attachment, Credential, MailMessage, NewMailNotice,
    OutgoingMail,
};
