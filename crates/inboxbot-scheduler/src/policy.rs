//! Pacing and backoff policy.

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::ErrorClass;

/// Default per-account slot in seconds.
pub const DEFAULT_SLOT_SECS: u64 = 300;

/// Default wait when there is nothing to poll.
pub const DEFAULT_IDLE_INTERVAL_SECS: u64 = 10;

/// Default flat backoff after provider throttling.
pub const DEFAULT_RATE_LIMIT_BACKOFF_SECS: u64 = 300;

/// Default first step of the exponential backoff.
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 300;

/// Default ceiling of the exponential backoff.
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 3600;

/// Default pause after a scheduler fault.
pub const DEFAULT_FAULT_PAUSE_SECS: u64 = 10;

/// Default upper bound on a single mailbox poll.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 120;

/// Default upper bound on a single notification.
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 30;

/// Scheduler tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Per-account time slot; an account is revisited every `slot * active accounts`.
    pub slot_secs: u64,
    /// Wait before re-querying when no account is active.
    pub idle_interval_secs: u64,
    /// Flat backoff after throttling.
    pub rate_limit_backoff_secs: u64,
    /// First step of the exponential backoff.
    pub backoff_base_secs: u64,
    /// Ceiling of the exponential backoff.
    pub max_backoff_secs: u64,
    /// Whole-loop pause after a store fault.
    pub fault_pause_secs: u64,
    /// Upper bound on one `fetch_unread` call.
    pub poll_timeout_secs: u64,
    /// Upper bound on one notification.
    pub notify_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            slot_secs: DEFAULT_SLOT_SECS,
            idle_interval_secs: DEFAULT_IDLE_INTERVAL_SECS,
            rate_limit_backoff_secs: DEFAULT_RATE_LIMIT_BACKOFF_SECS,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            max_backoff_secs: DEFAULT_MAX_BACKOFF_SECS,
            fault_pause_secs: DEFAULT_FAULT_PAUSE_SECS,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
            notify_timeout_secs: DEFAULT_NOTIFY_TIMEOUT_SECS,
        }
    }
}

impl SchedulerConfig {
    /// Delay until an account is due again after a poll starts.
    ///
    /// `slot * active_count`, with the count floored at 1 so the account is
    /// always pushed past now.
    pub fn pacing_delay(&self, active_count: usize) -> Duration {
        let count = active_count.max(1) as u64;
        secs(self.slot_secs.saturating_mul(count))
    }

    /// Delay before retrying an account whose poll failed.
    ///
    /// `prior_failures` is the failure count before this failure is recorded.
    pub fn failure_backoff(&self, class: ErrorClass, prior_failures: u32) -> Duration {
        match class {
            ErrorClass::RateLimited => secs(self.rate_limit_backoff_secs),
            ErrorClass::Transient => {
                let factor = 1u64.checked_shl(prior_failures).unwrap_or(u64::MAX);
                let backoff = self
                    .backoff_base_secs
                    .saturating_mul(factor)
                    .min(self.max_backoff_secs);
                secs(backoff)
            }
        }
    }

    pub fn idle_interval(&self) -> StdDuration {
        StdDuration::from_secs(self.idle_interval_secs)
    }

    pub fn fault_pause(&self) -> StdDuration {
        StdDuration::from_secs(self.fault_pause_secs)
    }

    pub fn poll_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.poll_timeout_secs)
    }

    pub fn notify_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.notify_timeout_secs)
    }
}

fn secs(value: u64) -> Duration {
    Duration::seconds(value.min(i64::MAX as u64 / 1000) as i64)
}
