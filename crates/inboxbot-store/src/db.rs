//! SQLite account table.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use inboxbot_scheduler::{Account, AccountId, AccountPatch, AccountStore, Credential, StoreError};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::DbError;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS accounts (
        chat_id INTEGER PRIMARY KEY,
        login TEXT NOT NULL,
        password TEXT NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        next_poll_at TEXT NOT NULL,
        failure_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_accounts_active ON accounts(active);
";

const SELECT_COLUMNS: &str =
    "SELECT chat_id, login, password, active, next_poll_at, failure_count, created_at FROM accounts";

/// Account store on a single SQLite connection.
///
/// The connection sits behind a mutex, so the polling loop and CLI commands
/// in the same process never interleave writes.
pub struct SqliteAccountStore {
    conn: Mutex<Connection>,
}

/// A row as stored, before timestamps are parsed.
struct AccountRow {
    chat_id: i64,
    login: String,
    password: String,
    active: bool,
    next_poll_at: String,
    failure_count: u32,
    created_at: String,
}

impl AccountRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            chat_id: row.get(0)?,
            login: row.get(1)?,
            password: row.get(2)?,
            active: row.get(3)?,
            next_poll_at: row.get(4)?,
            failure_count: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_account(self) -> Result<Account, DbError> {
        let id = self.chat_id;
        Ok(Account {
            id: AccountId(id),
            credential: Credential::new(self.login, self.password),
            active: self.active,
            next_poll_at: parse_timestamp(id, "next_poll_at", &self.next_poll_at)?,
            failure_count: self.failure_count,
            created_at: parse_timestamp(id, "created_at", &self.created_at)?,
        })
    }
}

impl SqliteAccountStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;

        // WAL lets the CLI read while the daemon writes
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.display(), "account database initialized");

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    /// Register an account, replacing any existing record for the chat.
    ///
    /// The new record is active, has no failures and is eligible immediately.
    #[tracing::instrument(skip(self, credential), fields(account_id = %id, login = %credential.login))]
    pub fn register(&self, id: AccountId, credential: &Credential) -> Result<Account, DbError> {
        let account = Account::register(id, credential.clone());
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO accounts
             (chat_id, login, password, active, next_poll_at, failure_count, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                account.id.0,
                account.credential.login,
                account.credential.secret,
                account.active,
                format_timestamp(account.next_poll_at),
                account.failure_count,
                format_timestamp(account.created_at),
            ],
        )?;
        info!("account registered");
        Ok(account)
    }

    /// Fetch one account.
    pub fn account(&self, id: AccountId) -> Result<Option<Account>, DbError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE chat_id = ?1"),
                params![id.0],
                AccountRow::from_row,
            )
            .optional()?;
        row.map(AccountRow::into_account).transpose()
    }

    /// Every account, active or not, ordered by chat id.
    pub fn list_all(&self) -> Result<Vec<Account>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY chat_id"))?;
        let rows = stmt
            .query_map([], AccountRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(AccountRow::into_account).collect()
    }

    /// Turn polling on or off for an account. Returns `false` if it does not exist.
    pub fn set_active(&self, id: AccountId, active: bool) -> Result<bool, DbError> {
        self.apply_patch(id, &AccountPatch::active(active))
    }

    /// Delete an account. Returns `false` if it did not exist.
    pub fn remove(&self, id: AccountId) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM accounts WHERE chat_id = ?1", params![id.0])?;
        if changed > 0 {
            info!(account_id = %id, "account removed");
        }
        Ok(changed > 0)
    }

    fn active_ids(&self) -> Result<Vec<AccountId>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT chat_id FROM accounts WHERE active = 1 ORDER BY chat_id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids.into_iter().map(AccountId).collect())
    }

    fn active_rows(&self) -> Result<Vec<Account>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} WHERE active = 1 ORDER BY chat_id"))?;
        let rows = stmt
            .query_map([], AccountRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        // An undecodable row must not hide the healthy ones from selection
        let mut accounts = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.chat_id;
            match row.into_account() {
                Ok(account) => accounts.push(account),
                Err(e) => warn!(account_id = id, error = %e, "skipping unreadable account record"),
            }
        }
        Ok(accounts)
    }

    fn active_count(&self) -> Result<usize, DbError> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM accounts WHERE active = 1", [], |row| {
                row.get(0)
            })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn apply_patch(&self, id: AccountId, patch: &AccountPatch) -> Result<bool, DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE accounts SET
                next_poll_at = COALESCE(?2, next_poll_at),
                failure_count = COALESCE(?3, failure_count),
                active = COALESCE(?4, active)
             WHERE chat_id = ?1",
            params![
                id.0,
                patch.next_poll_at.map(format_timestamp),
                patch.failure_count,
                patch.active,
            ],
        )?;
        debug!(account_id = %id, ?patch, found = changed > 0, "account updated");
        Ok(changed > 0)
    }
}

impl AccountStore for SqliteAccountStore {
    fn list_active_account_ids(&self) -> Result<Vec<AccountId>, StoreError> {
        Ok(self.active_ids()?)
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.account(id)?)
    }

    fn update_account(&self, id: AccountId, patch: &AccountPatch) -> Result<bool, StoreError> {
        Ok(self.apply_patch(id, patch)?)
    }

    // One query instead of one per id
    fn active_accounts(&self) -> Result<Vec<Account>, StoreError> {
        Ok(self.active_rows()?)
    }

    fn count_active(&self) -> Result<usize, StoreError> {
        Ok(self.active_count()?)
    }
}

/// Fixed-width UTC timestamps so stored values sort as text.
fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(id: i64, column: &str, value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| DbError::Corrupt {
            id,
            reason: format!("{column} {value:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn credential(n: i64) -> Credential {
        Credential::new(format!("user{n}@spbstu.ru"), format!("pw{n}"))
    }

    #[test]
    fn test_register_and_get() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        let registered = store.register(AccountId(100), &credential(1)).unwrap();

        let loaded = store.get_account(AccountId(100)).unwrap().unwrap();
        assert_eq!(loaded.credential, credential(1));
        assert!(loaded.active);
        assert_eq!(loaded.failure_count, 0);
        // Microsecond precision survives the round trip
        assert_eq!(
            loaded.next_poll_at.timestamp_micros(),
            registered.next_poll_at.timestamp_micros()
        );
    }

    #[test]
    fn test_missing_account_is_none() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        assert!(store.get_account(AccountId(1)).unwrap().is_none());
    }

    #[test]
    fn test_register_replaces_existing_record() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        store.register(AccountId(7), &credential(1)).unwrap();
        store
            .update_account(
                AccountId(7),
                &AccountPatch {
                    next_poll_at: Some(Utc::now() + Duration::hours(1)),
                    failure_count: Some(4),
                    active: Some(false),
                },
            )
            .unwrap();

        store.register(AccountId(7), &credential(2)).unwrap();

        let account = store.get_account(AccountId(7)).unwrap().unwrap();
        assert_eq!(account.credential.login, "user2@spbstu.ru");
        assert!(account.active);
        assert_eq!(account.failure_count, 0);
        assert!(account.next_poll_at <= Utc::now());
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_partial_update_leaves_other_fields() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        store.register(AccountId(1), &credential(1)).unwrap();
        let at = Utc::now() + Duration::seconds(900);

        assert!(
            store
                .update_account(AccountId(1), &AccountPatch::reschedule_failure(at, 3))
                .unwrap()
        );
        assert!(store.update_account(AccountId(1), &AccountPatch::active(false)).unwrap());

        let account = store.get_account(AccountId(1)).unwrap().unwrap();
        assert_eq!(account.next_poll_at.timestamp_micros(), at.timestamp_micros());
        assert_eq!(account.failure_count, 3);
        assert!(!account.active);
    }

    #[test]
    fn test_update_missing_account_reports_false() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        assert!(!store.update_account(AccountId(5), &AccountPatch::failure_count(0)).unwrap());
        assert!(!store.set_active(AccountId(5), true).unwrap());
    }

    #[test]
    fn test_active_queries_skip_inactive() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        for id in [3, 1, 2] {
            store.register(AccountId(id), &credential(id)).unwrap();
        }
        store.set_active(AccountId(2), false).unwrap();

        assert_eq!(
            store.list_active_account_ids().unwrap(),
            vec![AccountId(1), AccountId(3)]
        );
        assert_eq!(store.count_active().unwrap(), 2);
        let active: Vec<_> = store.active_accounts().unwrap().iter().map(|a| a.id).collect();
        assert_eq!(active, vec![AccountId(1), AccountId(3)]);
        assert_eq!(store.list_all().unwrap().len(), 3);
    }

    #[test]
    fn test_remove() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        store.register(AccountId(1), &credential(1)).unwrap();
        assert!(store.remove(AccountId(1)).unwrap());
        assert!(!store.remove(AccountId(1)).unwrap());
        assert_eq!(store.count_active().unwrap(), 0);
    }

    #[test]
    fn test_corrupt_timestamp_is_reported() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        store.register(AccountId(9), &credential(9)).unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE accounts SET next_poll_at = 'soon' WHERE chat_id = 9", [])
            .unwrap();

        match store.get_account(AccountId(9)) {
            Err(StoreError::Corrupt { id, reason }) => {
                assert_eq!(id, 9);
                assert!(reason.contains("next_poll_at"));
            }
            other => panic!("expected corrupt record, got {other:?}"),
        }
    }

    #[test]
    fn test_corrupt_row_does_not_hide_healthy_accounts() {
        let store = SqliteAccountStore::open_in_memory().unwrap();
        store.register(AccountId(1), &credential(1)).unwrap();
        store.register(AccountId(2), &credential(2)).unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE accounts SET created_at = 'garbage' WHERE chat_id = 2", [])
            .unwrap();

        let active = store.active_accounts().unwrap();
        let ids: Vec<AccountId> = active.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![AccountId(1)]);
        assert_eq!(
            inboxbot_scheduler::selector::select_next(&active).map(|a| a.id),
            Some(AccountId(1))
        );

        // Direct lookups still report the damage
        assert!(matches!(
            store.get_account(AccountId(2)),
            Err(StoreError::Corrupt { id: 2, .. })
        ));
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("accounts.db");

        {
            let store = SqliteAccountStore::open(&path).unwrap();
            store.register(AccountId(11), &credential(11)).unwrap();
            store
                .update_account(AccountId(11), &AccountPatch::failure_count(2))
                .unwrap();
        }

        let store = SqliteAccountStore::open(&path).unwrap();
        let account = store.get_account(AccountId(11)).unwrap().unwrap();
        assert_eq!(account.failure_count, 2);
        assert_eq!(account.credential.secret, "pw11");
    }

    #[test]
    fn test_two_handles_share_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("accounts.db");
        let daemon = SqliteAccountStore::open(&path).unwrap();
        let cli = SqliteAccountStore::open(&path).unwrap();

        cli.register(AccountId(1), &credential(1)).unwrap();
        assert_eq!(daemon.count_active().unwrap(), 1);

        cli.set_active(AccountId(1), false).unwrap();
        assert!(daemon.list_active_account_ids().unwrap().is_empty());
    }
}
