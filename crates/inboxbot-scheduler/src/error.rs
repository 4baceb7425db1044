//! Error types for the scheduler and its collaborators.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by an account store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached (lock poisoned, connection gone).
    #[error("account store unavailable: {0}")]
    Unavailable(String),

    /// A query or write failed.
    #[error("account store query failed: {0}")]
    Query(String),

    /// A stored row could not be decoded.
    #[error("corrupt account record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

/// Errors reported by a mail backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The provider throttled us.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The credential was rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The call did not finish in time.
    #[error("mail backend call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Any other failure.
    #[error("{0}")]
    Transient(String),
}

/// How a failed poll is treated by the backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Provider throttling: flat backoff.
    RateLimited,
    /// Everything else: exponential backoff.
    Transient,
}

impl BackendError {
    /// Classify this error for the backoff policy.
    ///
    /// Typed rate-limit errors are always throttling. Auth failures and
    /// timeouts never are. Untyped transient errors are throttling when
    /// their text mentions it.
    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::RateLimited(_) => ErrorClass::RateLimited,
            BackendError::Transient(text) if mentions_throttling(text) => ErrorClass::RateLimited,
            _ => ErrorClass::Transient,
        }
    }
}

/// Check whether an error message looks like provider throttling.
pub fn mentions_throttling(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["rate", "limit", "throttl", "429"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Errors reported by a notification sink.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// The user revoked access (blocked the bot, deleted the chat).
    #[error("recipient blocked delivery: {0}")]
    Blocked(String),

    /// Delivery failed for any other reason.
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}
