//! Polling loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::{
    Account, AccountId, AccountPatch, AccountStore, BackendError, Credential, ErrorClass,
    MailBackend, MailMessage, NewMailNotice, NotificationSink, NotifyError, SchedulerConfig,
    StoreError, selector,
};

/// What one loop iteration did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// No active account; waited the idle interval.
    Idle,
    /// The candidate was deactivated, removed or rescheduled while we waited.
    Skipped(AccountId),
    /// An account was polled.
    Polled {
        account_id: AccountId,
        outcome: PollOutcome,
    },
    /// The store failed; the loop paused without touching any account.
    Fault,
    /// Shutdown was requested.
    Shutdown,
}

/// Result of polling one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The mailbox answered.
    Fetched {
        messages: usize,
        delivered: usize,
        failed: usize,
    },
    /// The mailbox call failed and the account was backed off.
    Failed {
        class: ErrorClass,
        backoff_secs: i64,
        failure_count: u32,
    },
    /// Shutdown arrived mid-call; the account keeps its pre-call schedule.
    Abandoned,
}

/// The polling scheduler.
pub struct Scheduler {
    store: Arc<dyn AccountStore>,
    backend: Arc<dyn MailBackend>,
    sink: Arc<dyn NotificationSink>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a new scheduler.
    pub fn new(
        store: Arc<dyn AccountStore>,
        backend: Arc<dyn MailBackend>,
        sink: Arc<dyn NotificationSink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            backend,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run the scheduler loop until shutdown is signalled.
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            slot_secs = self.config.slot_secs,
            idle_interval_secs = self.config.idle_interval_secs,
            "scheduler starting"
        );

        loop {
            if *shutdown_rx.borrow() {
                info!("scheduler shutting down");
                break;
            }

            if self.step(&mut shutdown_rx).await == Step::Shutdown {
                info!("scheduler received shutdown signal");
                break;
            }
        }

        info!("scheduler shut down gracefully");
    }

    /// Run one iteration: select, wait, poll, reschedule.
    pub async fn step(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Step {
        let candidate = match self.select_candidate() {
            Ok(candidate) => candidate,
            Err(e) => return self.fault("select candidate", &e, shutdown_rx).await,
        };

        let Some(candidate) = candidate else {
            debug!(
                idle_secs = self.config.idle_interval_secs,
                "no active accounts, idling"
            );
            if !pause(self.config.idle_interval(), shutdown_rx).await {
                return Step::Shutdown;
            }
            return Step::Idle;
        };

        if !wait_until(candidate.next_poll_at, shutdown_rx).await {
            return Step::Shutdown;
        }

        // Re-read after the wait: the account may have changed under us
        let account = match self.store.get_account(candidate.id) {
            Ok(Some(account))
                if account.active && account.next_poll_at <= candidate.next_poll_at =>
            {
                account
            }
            Ok(_) => {
                debug!(account_id = %candidate.id, "candidate changed during wait, reselecting");
                return Step::Skipped(candidate.id);
            }
            Err(e) => return self.fault("reload candidate", &e, shutdown_rx).await,
        };

        self.poll(account, shutdown_rx).await
    }

    /// The active account with the earliest `next_poll_at`.
    pub fn select_candidate(&self) -> Result<Option<Account>, StoreError> {
        let accounts = self.store.active_accounts()?;
        Ok(selector::select_next(&accounts).cloned())
    }

    /// Poll one account whose eligibility time has passed.
    #[tracing::instrument(skip(self, account, shutdown_rx), fields(account_id = %account.id))]
    async fn poll(&self, account: Account, shutdown_rx: &mut watch::Receiver<bool>) -> Step {
        let account_id = account.id;
        let now = Utc::now();

        // Advance the schedule before calling out, so a slow or crashed poll
        // can never make this account eligible twice
        let active_count = match self.store.count_active() {
            Ok(count) => count,
            Err(e) => return self.fault("count active accounts", &e, shutdown_rx).await,
        };
        let next_poll_at = now + self.config.pacing_delay(active_count);

        match self
            .store
            .update_account(account_id, &AccountPatch::next_poll_at(next_poll_at))
        {
            Ok(true) => {}
            Ok(false) => {
                debug!("account disappeared before poll");
                return Step::Skipped(account_id);
            }
            Err(e) => return self.fault("advance schedule", &e, shutdown_rx).await,
        }

        debug!(active_count, next_poll_at = %next_poll_at, "polling mailbox");

        let fetch = self.spawn_fetch(account.credential.clone());
        let abort = fetch.abort_handle();

        let result = tokio::select! {
            biased;

            _ = shutdown_requested(shutdown_rx) => {
                abort.abort();
                info!("shutdown during poll, abandoning call");
                return Step::Polled {
                    account_id,
                    outcome: PollOutcome::Abandoned,
                };
            }

            joined = fetch => match joined {
                Ok(result) => result,
                Err(e) => Err(BackendError::Transient(format!("poll task failed: {}", e))),
            },
        };

        let outcome = match result {
            Ok(messages) => self.record_success(&account, &messages).await,
            Err(e) => self.record_failure(&account, now, &e),
        };

        Step::Polled {
            account_id,
            outcome,
        }
    }

    /// Run the backend call on its own task, bounded by the poll timeout.
    fn spawn_fetch(
        &self,
        credential: Credential,
    ) -> JoinHandle<Result<Vec<MailMessage>, BackendError>> {
        let backend = Arc::clone(&self.backend);
        let timeout = self.config.poll_timeout();

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, backend.fetch_unread(&credential)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(timeout)),
            }
        })
    }

    async fn record_success(&self, account: &Account, messages: &[MailMessage]) -> PollOutcome {
        let account_id = account.id;

        if let Err(e) = self
            .store
            .update_account(account_id, &AccountPatch::failure_count(0))
        {
            error!(error = %e, "failed to reset failure count");
        }

        if messages.is_empty() {
            debug!("no unread mail");
            return PollOutcome::Fetched {
                messages: 0,
                delivered: 0,
                failed: 0,
            };
        }

        let mut delivered = 0;
        let mut failed = 0;
        let mut blocked = false;

        for message in messages {
            let notice = NewMailNotice::from_message(account_id, message);
            match tokio::time::timeout(
                self.config.notify_timeout(),
                self.sink.notify(account_id, &notice),
            )
            .await
            {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(NotifyError::Blocked(reason))) => {
                    warn!(reason = %reason, "recipient blocked notifications");
                    blocked = true;
                    failed += 1;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, message_id = ?message.id, "failed to deliver notification");
                    failed += 1;
                }
                Err(_) => {
                    warn!(
                        timeout_secs = self.config.notify_timeout_secs,
                        message_id = ?message.id,
                        "notification timed out"
                    );
                    failed += 1;
                }
            }
        }

        if blocked {
            match self
                .store
                .update_account(account_id, &AccountPatch::active(false))
            {
                Ok(_) => info!("deactivated account after recipient revoked access"),
                Err(e) => error!(error = %e, "failed to deactivate blocked account"),
            }
        }

        info!(
            messages = messages.len(),
            delivered, failed, "found new mail"
        );

        PollOutcome::Fetched {
            messages: messages.len(),
            delivered,
            failed,
        }
    }

    fn record_failure(
        &self,
        account: &Account,
        started_at: DateTime<Utc>,
        error: &BackendError,
    ) -> PollOutcome {
        let class = error.class();
        let backoff = self.config.failure_backoff(class, account.failure_count);
        let failure_count = account.failure_count.saturating_add(1);
        let next_poll_at = started_at + backoff;

        warn!(
            error = %error,
            class = ?class,
            backoff_secs = backoff.num_seconds(),
            failure_count,
            "mailbox poll failed, backing off"
        );

        if let Err(e) = self.store.update_account(
            account.id,
            &AccountPatch::reschedule_failure(next_poll_at, failure_count),
        ) {
            error!(error = %e, "failed to record poll failure");
        }

        PollOutcome::Failed {
            class,
            backoff_secs: backoff.num_seconds(),
            failure_count,
        }
    }

    async fn fault(
        &self,
        during: &str,
        e: &StoreError,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Step {
        error!(
            error = %e,
            during,
            pause_secs = self.config.fault_pause_secs,
            "scheduler fault, pausing"
        );
        if pause(self.config.fault_pause(), shutdown_rx).await {
            Step::Fault
        } else {
            Step::Shutdown
        }
    }
}

/// Sleep for `duration` unless shutdown arrives first.
///
/// Returns `false` if interrupted by shutdown.
async fn pause(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;

        _ = shutdown_requested(shutdown_rx) => false,
        _ = sleep(duration) => true,
    }
}

/// Sleep until `at` unless shutdown arrives first.
async fn wait_until(at: DateTime<Utc>, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    let remaining = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    if !remaining.is_zero() {
        debug!(wait_secs = remaining.as_secs(), "waiting for next eligible account");
    }
    pause(remaining, shutdown_rx).await
}

/// Resolve once shutdown has been requested.
///
/// Never resolves if the sender is gone without having asked.
async fn shutdown_requested(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
