//! Store error types.

use inboxbot_scheduler::StoreError;
use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("corrupt row for chat {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

impl DbError {
    /// Whether the database was busy or locked rather than the query being wrong.
    pub fn is_busy(&self) -> bool {
        match self {
            DbError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        if e.is_busy() {
            return StoreError::Unavailable(e.to_string());
        }
        match e {
            DbError::Poisoned => StoreError::Unavailable("database connection lock poisoned".into()),
            DbError::Corrupt { id, reason } => StoreError::Corrupt { id, reason },
            DbError::Sqlite(e) => StoreError::Query(e.to_string()),
        }
    }
}
