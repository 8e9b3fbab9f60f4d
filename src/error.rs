use thiserror::Error;

use crate::db::Status;
use crate::voltdb::ResponseStatus;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to connect to {host}: {reason}")]
    Connection { host: String, reason: String },

    #[error("Authentication rejected by {host} (code {code})")]
    Authentication { host: String, code: u8 },

    #[error("Not connected; init() has not succeeded or cleanup() already ran")]
    NotConnected,

    #[error("Connection to the cluster was lost")]
    ConnectionLost,

    #[error("Client is closed")]
    Closed,

    #[error("Record '{key}' not found")]
    NotFound { key: String },

    #[error("Field '{field}' is missing")]
    MissingField { field: String },

    #[error("Procedure {procedure} returned {rows} rows, expected 1")]
    UnexpectedRowCount { procedure: String, rows: usize },

    #[error("Procedure {procedure} failed with {status:?}: {message}")]
    Procedure {
        procedure: String,
        status: ResponseStatus,
        message: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl DbError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        DbError::Protocol(msg.into())
    }

    pub fn status(&self) -> Status {
        match self {
            DbError::NotFound { .. } => Status::NotFound,
            DbError::MissingField { .. } => Status::BadRequest,
            DbError::Io(_)
            | DbError::Connection { .. }
            | DbError::Authentication { .. }
            | DbError::NotConnected
            | DbError::ConnectionLost
            | DbError::Closed => Status::ServiceUnavailable,
            DbError::Procedure { status, .. } if status.is_unavailable() => {
                Status::ServiceUnavailable
            }
            DbError::UnexpectedRowCount { .. }
            | DbError::Procedure { .. }
            | DbError::Protocol(_) => Status::Error,
        }
    }
}
