//! One-off mail commands: `send` and `check`.

use miette::Result;
use tracing::info;

use inboxbot_ews::{EwsClient, EwsConfig};
use inboxbot_scheduler::{Account, AccountId, NewMailNotice, OutgoingMail};
use inboxbot_store::SqliteAccountStore;
use inboxbot_telegram::format::render_notice;

fn load_account(store: &SqliteAccountStore, chat_id: i64) -> Result<Account> {
    store
        .account(AccountId(chat_id))
        .map_err(|e| miette::miette!("failed to load account: {}", e))?
        .ok_or_else(|| miette::miette!("no account for chat {}", chat_id))
}

pub async fn send(
    store: &SqliteAccountStore,
    ews: EwsConfig,
    chat_id: i64,
    mail: &OutgoingMail,
) -> Result<()> {
    let account = load_account(store, chat_id)?;
    let client = EwsClient::new(ews).map_err(|e| miette::miette!("{}", e))?;

    client
        .send_mail(&account.credential, mail)
        .await
        .map_err(|e| miette::miette!("failed to send mail: {}", e))?;

    println!("Sent \"{}\" to {}.", mail.subject, mail.to.join(", "));
    Ok(())
}

/// Fetch once and print what the daemon would send. Scheduling state is untouched.
pub async fn check(store: &SqliteAccountStore, ews: EwsConfig, chat_id: i64) -> Result<()> {
    let account = load_account(store, chat_id)?;
    if !account.active {
        info!(account_id = chat_id, "account is inactive; the daemon will not poll it");
    }

    let client = EwsClient::new(ews).map_err(|e| miette::miette!("{}", e))?;
    let messages = client
        .fetch_unread(&account.credential)
        .await
        .map_err(|e| miette::miette!("failed to fetch unread mail: {}", e))?;

    if messages.is_empty() {
        println!("No unread mail for {}.", account.credential.login);
        return Ok(());
    }

    for message in &messages {
        println!("{}", render_notice(&NewMailNotice::from_message(account.id, message)));
    }
    println!("{} unread message(s).", messages.len());
    Ok(())
}
