//! Account management commands.

use std::path::Path;

use miette::Result;
use tracing::info;

use inboxbot_scheduler::{Account, AccountId, Credential};
use inboxbot_store::SqliteAccountStore;

pub fn open_store(path: &Path) -> Result<SqliteAccountStore> {
    SqliteAccountStore::open(path)
        .map_err(|e| miette::miette!("failed to open account database {}: {}", path.display(), e))
}

/// Get the mailbox password from the flag/env or an interactive prompt.
fn read_password(password: Option<String>) -> Result<String> {
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        return Ok(password);
    }

    eprint!("Mailbox password: ");
    let password = rpassword::read_password()
        .map_err(|e| miette::miette!("failed to read password: {}", e))?;
    if password.is_empty() {
        return Err(miette::miette!("password must not be empty"));
    }
    Ok(password)
}

pub fn add(
    store: &SqliteAccountStore,
    chat_id: i64,
    login: String,
    password: Option<String>,
) -> Result<()> {
    let login = login.trim().to_string();
    if login.is_empty() {
        return Err(miette::miette!("login must not be empty"));
    }

    let password = read_password(password)?;
    let account = store
        .register(AccountId(chat_id), &Credential::new(login, password))
        .map_err(|e| miette::miette!("failed to register account: {}", e))?;

    info!(account_id = %account.id, "account ready for polling");
    println!(
        "Registered {} for chat {}; first poll is due now.",
        account.credential.login, account.id
    );
    Ok(())
}

pub fn list(store: &SqliteAccountStore) -> Result<()> {
    let accounts = store
        .list_all()
        .map_err(|e| miette::miette!("failed to list accounts: {}", e))?;

    if accounts.is_empty() {
        println!("No accounts registered.");
        return Ok(());
    }

    println!("{}", header());
    for account in &accounts {
        println!("{}", row(account));
    }
    Ok(())
}

pub fn set_active(store: &SqliteAccountStore, chat_id: i64, active: bool) -> Result<()> {
    let found = store
        .set_active(AccountId(chat_id), active)
        .map_err(|e| miette::miette!("failed to update account: {}", e))?;
    if !found {
        return Err(miette::miette!("no account for chat {}", chat_id));
    }

    info!(account_id = chat_id, active, "account activation changed");
    println!(
        "Account {} {}.",
        chat_id,
        if active { "activated" } else { "deactivated" }
    );
    Ok(())
}

pub fn remove(store: &SqliteAccountStore, chat_id: i64) -> Result<()> {
    let found = store
        .remove(AccountId(chat_id))
        .map_err(|e| miette::miette!("failed to remove account: {}", e))?;
    if !found {
        return Err(miette::miette!("no account for chat {}", chat_id));
    }
    println!("Account {} removed.", chat_id);
    Ok(())
}

fn header() -> String {
    format!(
        "{:<14} {:<32} {:<8} {:<8} {}",
        "CHAT", "LOGIN", "ACTIVE", "FAILS", "NEXT POLL"
    )
}

fn row(account: &Account) -> String {
    format!(
        "{:<14} {:<32} {:<8} {:<8} {}",
        account.id.0,
        account.credential.login,
        if account.active { "yes" } else { "no" },
        account.failure_count,
        account.next_poll_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_then_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("accounts.db")).unwrap();

        add(&store, 42, " user@spbstu.ru ".to_string(), Some("pw".to_string())).unwrap();
        let account = store.account(AccountId(42)).unwrap().unwrap();
        assert_eq!(account.credential.login, "user@spbstu.ru");

        set_active(&store, 42, false).unwrap();
        assert!(!store.account(AccountId(42)).unwrap().unwrap().active);

        set_active(&store, 42, true).unwrap();
        assert!(store.account(AccountId(42)).unwrap().unwrap().active);
    }

    #[test]
    fn test_unknown_account_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("accounts.db")).unwrap();

        assert!(set_active(&store, 7, true).is_err());
        assert!(remove(&store, 7).is_err());
    }

    #[test]
    fn test_blank_login_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir.path().join("accounts.db")).unwrap();
        assert!(add(&store, 1, "   ".to_string(), Some("pw".to_string())).is_err());
    }

    #[test]
    fn test_row_never_shows_password() {
        let account = Account::register(AccountId(5), Credential::new("a@spbstu.ru", "hunter2"));
        let line = row(&account);
        assert!(line.starts_with("5 "));
        assert!(line.contains("a@spbstu.ru"));
        assert!(line.contains("yes"));
        assert!(!line.contains("hunter2"));
    }
}
