//! inboxbot: Telegram notifications for new Exchange mail
//!
//! Main binary with subcommands:
//! - `daemon`: Poll every active mailbox round-robin and notify on new mail
//! - `account`: Register, list, activate, deactivate and remove accounts
//! - `send`: Send a message from a registered mailbox
//! - `check`: Fetch unread mail for one account once and print the notices

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inboxbot_ews::EwsConfig;
use inboxbot_scheduler::SchedulerConfig;
use inboxbot_scheduler::policy::{
    DEFAULT_BACKOFF_BASE_SECS, DEFAULT_FAULT_PAUSE_SECS, DEFAULT_IDLE_INTERVAL_SECS,
    DEFAULT_MAX_BACKOFF_SECS, DEFAULT_NOTIFY_TIMEOUT_SECS, DEFAULT_POLL_TIMEOUT_SECS,
    DEFAULT_RATE_LIMIT_BACKOFF_SECS, DEFAULT_SLOT_SECS,
};
use inboxbot_telegram::TelegramConfig;

mod accounts;
mod daemon;
mod mail;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" (case-insensitive) as true.
/// Accepts "0", "false", "no", "off", "" (case-insensitive) as false.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "inboxbot")]
#[command(about = "Telegram notifications for new Exchange mail", long_about = None)]
struct Cli {
    /// SQLite database holding the accounts
    #[arg(long, global = true, env = "INBOXBOT_DB", default_value = "inboxbot.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the polling daemon
    Daemon {
        /// Telegram bot token
        #[arg(long, env = "INBOXBOT_BOT_TOKEN", hide_env_values = true)]
        bot_token: String,

        /// Telegram Bot API base URL
        #[arg(long, env = "INBOXBOT_TELEGRAM_API", default_value = inboxbot_telegram::DEFAULT_API_BASE)]
        telegram_api: String,

        #[command(flatten)]
        ews: EwsArgs,

        #[command(flatten)]
        schedule: ScheduleArgs,
    },

    /// Manage registered accounts
    Account {
        #[command(subcommand)]
        command: AccountCommand,
    },

    /// Send a message from a registered mailbox
    Send {
        /// Account (Telegram chat id) to send from
        #[arg(long)]
        chat_id: i64,

        /// Recipients (comma-separated or repeated)
        #[arg(long, value_delimiter = ',', required = true)]
        to: Vec<String>,

        #[arg(long, default_value = "")]
        subject: String,

        #[arg(long, default_value = "")]
        body: String,

        /// Local file to attach (repeatable); missing files are skipped
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,

        /// Do not keep a copy in Sent Items
        #[arg(long)]
        no_save: bool,

        #[command(flatten)]
        ews: EwsArgs,
    },

    /// Fetch unread mail for one account and print the notices
    Check {
        /// Account (Telegram chat id) to check
        #[arg(long)]
        chat_id: i64,

        #[command(flatten)]
        ews: EwsArgs,
    },
}

#[derive(Subcommand)]
enum AccountCommand {
    /// Register an account, replacing any existing record for the chat
    Add {
        /// Telegram chat id notifications go to
        #[arg(long)]
        chat_id: i64,

        /// Mailbox login (email address)
        #[arg(long)]
        login: String,

        /// Mailbox password (prompted when omitted)
        #[arg(long, env = "INBOXBOT_MAIL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// List all accounts
    List,

    /// Resume polling an account
    Activate {
        #[arg(long)]
        chat_id: i64,
    },

    /// Stop polling an account, keeping its record
    Deactivate {
        #[arg(long)]
        chat_id: i64,
    },

    /// Delete an account
    Remove {
        #[arg(long)]
        chat_id: i64,
    },
}

/// Exchange connection options.
#[derive(Args, Debug, Clone)]
struct EwsArgs {
    /// Exchange server host
    #[arg(long, env = "INBOXBOT_MAIL_SERVER", default_value = inboxbot_ews::DEFAULT_SERVER)]
    mail_server: String,

    /// Exchange server HTTPS port
    #[arg(long, env = "INBOXBOT_MAIL_PORT", default_value_t = inboxbot_ews::DEFAULT_PORT)]
    mail_port: u16,

    /// Full EWS endpoint URL (overrides server and port)
    #[arg(long, env = "INBOXBOT_EWS_URL")]
    ews_url: Option<String>,

    /// Verify the server's TLS certificate
    #[arg(
        long,
        env = "INBOXBOT_VERIFY_TLS",
        value_parser = parse_bool_env,
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    verify_tls: bool,

    /// Unread messages fetched per poll
    #[arg(long, env = "INBOXBOT_FETCH_LIMIT", default_value_t = inboxbot_ews::DEFAULT_FETCH_LIMIT)]
    fetch_limit: usize,

    /// Flag fetched messages as read on the server
    #[arg(long, env = "INBOXBOT_MARK_AS_READ", value_parser = parse_bool_env, default_value = "false")]
    mark_as_read: bool,

    /// Timeout for one EWS request in seconds
    #[arg(long, env = "INBOXBOT_EWS_TIMEOUT", default_value = "60")]
    ews_timeout: u64,
}

impl EwsArgs {
    fn into_config(self) -> EwsConfig {
        EwsConfig {
            server: self.mail_server,
            port: self.mail_port,
            endpoint: self.ews_url.filter(|url| !url.is_empty()),
            verify_tls: self.verify_tls,
            fetch_limit: self.fetch_limit,
            mark_as_read: self.mark_as_read,
            request_timeout: Duration::from_secs(self.ews_timeout),
        }
    }
}

/// Scheduler tuning options.
#[derive(Args, Debug, Clone)]
struct ScheduleArgs {
    /// Per-account slot in seconds; each account is revisited every slot * active accounts
    #[arg(long, env = "INBOXBOT_POLL_SLOT_SECONDS", default_value_t = DEFAULT_SLOT_SECS)]
    slot_secs: u64,

    /// Wait when no account is active, in seconds
    #[arg(long, env = "INBOXBOT_IDLE_SECONDS", default_value_t = DEFAULT_IDLE_INTERVAL_SECS)]
    idle_secs: u64,

    /// Backoff after provider throttling, in seconds
    #[arg(long, env = "INBOXBOT_RATE_LIMIT_BACKOFF_SECONDS", default_value_t = DEFAULT_RATE_LIMIT_BACKOFF_SECS)]
    rate_limit_backoff_secs: u64,

    /// First step of the exponential failure backoff, in seconds
    #[arg(long, env = "INBOXBOT_BACKOFF_BASE_SECONDS", default_value_t = DEFAULT_BACKOFF_BASE_SECS)]
    backoff_base_secs: u64,

    /// Ceiling of the failure backoff, in seconds
    #[arg(long, env = "INBOXBOT_MAX_BACKOFF_SECONDS", default_value_t = DEFAULT_MAX_BACKOFF_SECS)]
    max_backoff_secs: u64,

    /// Pause after a database fault, in seconds
    #[arg(long, env = "INBOXBOT_FAULT_PAUSE_SECONDS", default_value_t = DEFAULT_FAULT_PAUSE_SECS)]
    fault_pause_secs: u64,

    /// Upper bound on one mailbox poll, in seconds
    #[arg(long, env = "INBOXBOT_POLL_TIMEOUT_SECONDS", default_value_t = DEFAULT_POLL_TIMEOUT_SECS)]
    poll_timeout_secs: u64,

    /// Upper bound on one notification, in seconds
    #[arg(long, env = "INBOXBOT_NOTIFY_TIMEOUT_SECONDS", default_value_t = DEFAULT_NOTIFY_TIMEOUT_SECS)]
    notify_timeout_secs: u64,
}

impl ScheduleArgs {
    fn into_config(self) -> Result<SchedulerConfig> {
        if self.slot_secs == 0 {
            return Err(miette::miette!("--slot-secs must be at least 1"));
        }
        Ok(SchedulerConfig {
            slot_secs: self.slot_secs,
            idle_interval_secs: self.idle_secs,
            rate_limit_backoff_secs: self.rate_limit_backoff_secs,
            backoff_base_secs: self.backoff_base_secs,
            max_backoff_secs: self.max_backoff_secs,
            fault_pause_secs: self.fault_pause_secs,
            poll_timeout_secs: self.poll_timeout_secs,
            notify_timeout_secs: self.notify_timeout_secs,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "inboxbot=info,inboxbot_scheduler=info,inboxbot_store=info,inboxbot_ews=info,inboxbot_telegram=info"
                    .to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            bot_token,
            telegram_api,
            ews,
            schedule,
        } => {
            let mut telegram = TelegramConfig::new(bot_token);
            telegram.api_base = telegram_api;

            daemon::run(daemon::DaemonConfig {
                db_path: cli.db,
                ews: ews.into_config(),
                telegram,
                scheduler: schedule.into_config()?,
            })
            .await
        }

        Commands::Account { command } => {
            let store = accounts::open_store(&cli.db)?;
            match command {
                AccountCommand::Add {
                    chat_id,
                    login,
                    password,
                } => accounts::add(&store, chat_id, login, password),
                AccountCommand::List => accounts::list(&store),
                AccountCommand::Activate { chat_id } => accounts::set_active(&store, chat_id, true),
                AccountCommand::Deactivate { chat_id } => {
                    accounts::set_active(&store, chat_id, false)
                }
                AccountCommand::Remove { chat_id } => accounts::remove(&store, chat_id),
            }
        }

        Commands::Send {
            chat_id,
            to,
            subject,
            body,
            attachments,
            no_save,
            ews,
        } => {
            let store = accounts::open_store(&cli.db)?;
            let mail = inboxbot_scheduler::OutgoingMail {
                to,
                subject,
                body,
                attachments,
                save_to_sent: !no_save,
            };
            mail::send(&store, ews.into_config(), chat_id, &mail).await
        }

        Commands::Check { chat_id, ews } => {
            let store = accounts::open_store(&cli.db)?;
            mail::check(&store, ews.into_config(), chat_id).await
        }
    }
}
