//! Exchange Web Services mail backend for inboxbot.
//!
//! Talks SOAP to `/EWS/Exchange.asmx` with basic auth: `FindItem` for unread
//! inbox mail, `GetItem` for attachment metadata, `UpdateItem` to flag mail
//! as read and `CreateItem` to send.

mod client;
mod error;
mod response;
mod soap;

pub use client::{DEFAULT_FETCH_LIMIT, DEFAULT_PORT, DEFAULT_SERVER, EwsClient, EwsConfig};
pub use error::{EwsError, SERVER_BUSY};
