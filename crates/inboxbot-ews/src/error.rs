//! Error types for the EWS client.

use std::path::PathBuf;

use inboxbot_scheduler::BackendError;
use thiserror::Error;

/// EWS response code for server-side throttling.
pub const SERVER_BUSY: &str = "ErrorServerBusy";

/// Errors that can occur when talking to Exchange.
#[derive(Debug, Error)]
pub enum EwsError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected the credential.
    #[error("authentication failed: server returned 401")]
    Unauthorized,

    /// The server throttled us.
    #[error("server busy during {operation}: {detail}")]
    Throttled {
        operation: &'static str,
        detail: String,
    },

    /// Non-success HTTP status without a usable SOAP body.
    #[error("{operation} failed with HTTP {status}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// SOAP fault.
    #[error("SOAP fault during {operation}: {message}")]
    Fault {
        operation: &'static str,
        message: String,
    },

    /// The operation returned an error response message.
    #[error("{operation} returned {code}: {message}")]
    Response {
        operation: &'static str,
        code: String,
        message: String,
    },

    /// The reply was not valid XML.
    #[error("invalid XML in {operation} response: {message}")]
    Xml {
        operation: &'static str,
        message: String,
    },

    /// A local attachment could not be read.
    #[error("failed to read attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The request was rejected before sending.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<EwsError> for BackendError {
    fn from(e: EwsError) -> Self {
        let text = e.to_string();
        match &e {
            EwsError::Throttled { .. } => BackendError::RateLimited(text),
            EwsError::Unauthorized => BackendError::Auth(text),
            EwsError::Http(http) if http.status().map(|s| s.as_u16()) == Some(429) => {
                BackendError::RateLimited(text)
            }
            _ => BackendError::Transient(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inboxbot_scheduler::ErrorClass;

    #[test]
    fn test_throttled_is_rate_limited() {
        let err: BackendError = EwsError::Throttled {
            operation: "FindItem",
            detail: SERVER_BUSY.to_string(),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::RateLimited);
    }

    #[test]
    fn test_unauthorized_is_auth() {
        let err: BackendError = EwsError::Unauthorized.into();
        assert!(matches!(err, BackendError::Auth(_)));
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_response_error_is_transient() {
        let err: BackendError = EwsError::Response {
            operation: "FindItem",
            code: "ErrorMailboxMoveInProgress".to_string(),
            message: "mailbox move in progress".to_string(),
        }
        .into();
        assert_eq!(err.class(), ErrorClass::Transient);
    }
}
