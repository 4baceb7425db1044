//! In-memory collaborators for scheduler tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use inboxbot_scheduler::{
    Account, AccountId, AccountPatch, AccountStore, BackendError, Credential, MailBackend,
    MailMessage, NewMailNotice, NotificationSink, NotifyError, OutgoingMail, StoreError,
};

/// Account store backed by a map.
#[derive(Default)]
pub struct MemoryStore {
    accounts: Mutex<BTreeMap<AccountId, Account>>,
    fail_reads: AtomicBool,
    queries: Mutex<Vec<tokio::time::Instant>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, account: Account) {
        self.accounts.lock().unwrap().insert(account.id, account);
    }

    pub fn get(&self, id: i64) -> Account {
        self.accounts.lock().unwrap()[&AccountId(id)].clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// When each selection query happened (tokio clock).
    pub fn query_times(&self) -> Vec<tokio::time::Instant> {
        self.queries.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("database is locked".to_string()));
        }
        Ok(())
    }
}

impl AccountStore for MemoryStore {
    fn list_active_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        self.queries.lock().unwrap().push(tokio::time::Instant::now());
        self.check()?;
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.active)
            .map(|a| a.id)
            .collect())
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.check()?;
        Ok(self.accounts.lock().unwrap().get(&id).cloned())
    }

    fn update_account(&self, id: AccountId, patch: &AccountPatch) -> Result<bool, StoreError> {
        let mut accounts = self.accounts.lock().unwrap();
        match accounts.get_mut(&id) {
            Some(account) => {
                account.apply(patch);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Build an account with a given schedule.
pub fn account(id: i64, next_poll_at: DateTime<Utc>, failure_count: u32) -> Account {
    let mut account = Account::register(
        AccountId(id),
        Credential::new(format!("user{}@example.com", id), "secret"),
    );
    account.next_poll_at = next_poll_at;
    account.failure_count = failure_count;
    account
}

pub fn message(subject: &str) -> MailMessage {
    MailMessage {
        id: Some(format!("id-{}", subject)),
        sender: Some("sender@example.com".to_string()),
        subject: Some(subject.to_string()),
        received_at: Some(Utc::now()),
        has_attachments: false,
        attachments: Vec::new(),
    }
}

/// Mail backend that replays queued responses.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<Vec<MailMessage>, BackendError>>>,
    delay: Option<Duration>,
    probe: Option<(Arc<MemoryStore>, AccountId)>,
    observed: Mutex<Vec<Account>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, response: Result<Vec<MailMessage>, BackendError>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Snapshot an account from the store while the call is in flight.
    pub fn with_probe(mut self, store: Arc<MemoryStore>, id: i64) -> Self {
        self.probe = Some((store, AccountId(id)));
        self
    }

    pub fn observed(&self) -> Vec<Account> {
        self.observed.lock().unwrap().clone()
    }

    /// Logins the backend was called with, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailBackend for ScriptedBackend {
    async fn fetch_unread(&self, credential: &Credential) -> Result<Vec<MailMessage>, BackendError> {
        self.calls.lock().unwrap().push(credential.login.clone());

        if let Some((store, id)) = &self.probe
            && let Ok(Some(account)) = store.get_account(*id)
        {
            self.observed.lock().unwrap().push(account);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn send_mail(
        &self,
        _credential: &Credential,
        _mail: &OutgoingMail,
    ) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Notification sink that records what it was given.
#[derive(Default)]
pub struct RecordingSink {
    fail_on: HashSet<usize>,
    blocked: bool,
    attempts: Mutex<usize>,
    delivered: Mutex<Vec<NewMailNotice>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the n-th (0-based) delivery attempt.
    pub fn failing_on(mut self, attempt: usize) -> Self {
        self.fail_on.insert(attempt);
        self
    }

    /// Reject every delivery as blocked.
    pub fn blocked(mut self) -> Self {
        self.blocked = true;
        self
    }

    pub fn delivered(&self) -> Vec<NewMailNotice> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(
        &self,
        _account_id: AccountId,
        notice: &NewMailNotice,
    ) -> Result<(), NotifyError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let current = *attempts;
            *attempts += 1;
            current
        };

        if self.blocked {
            return Err(NotifyError::Blocked("Forbidden: bot was blocked by the user".into()));
        }
        if self.fail_on.contains(&attempt) {
            return Err(NotifyError::Delivery("Bad Gateway".into()));
        }

        self.delivered.lock().unwrap().push(notice.clone());
        Ok(())
    }
}
