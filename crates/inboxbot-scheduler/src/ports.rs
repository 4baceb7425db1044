//! Capabilities the scheduler is built on.
//!
//! The scheduler never talks to SQLite, Exchange or Telegram directly; it is
//! handed implementations of these traits.

use async_trait::async_trait;

use crate::{
    Account, AccountId, AccountPatch, BackendError, Credential, MailMessage, NewMailNotice,
    NotifyError, OutgoingMail, StoreError,
};

/// Durable account records.
///
/// Implementations serialise concurrent access themselves; the polling loop
/// and the registration path may write at the same time.
pub trait AccountStore: Send + Sync {
    /// Ids of all active accounts.
    fn list_active_account_ids(&self) -> Result<Vec<AccountId>, StoreError>;

    /// Fetch one account, active or not.
    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// Apply a partial update. Returns `false` if the account does not exist.
    fn update_account(&self, id: AccountId, patch: &AccountPatch) -> Result<bool, StoreError>;

    /// All active accounts.
    fn active_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let mut accounts = Vec::new();
        for id in self.list_active_account_ids()? {
            if let Some(account) = self.get_account(id)?
                && account.active
            {
                accounts.push(account);
            }
        }
        Ok(accounts)
    }

    /// Number of active accounts.
    fn count_active(&self) -> Result<usize, StoreError> {
        Ok(self.list_active_account_ids()?.len())
    }
}

/// A mailbox provider reachable with a per-account credential.
#[async_trait]
pub trait MailBackend: Send + Sync {
    /// Fetch unread inbox messages, newest first.
    async fn fetch_unread(&self, credential: &Credential) -> Result<Vec<MailMessage>, BackendError>;

    /// Send a message from the credential's mailbox.
    async fn send_mail(
        &self,
        credential: &Credential,
        mail: &OutgoingMail,
    ) -> Result<(), BackendError>;
}

/// Delivers new-mail notices to the account owner.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, account_id: AccountId, notice: &NewMailNotice)
    -> Result<(), NotifyError>;
}
