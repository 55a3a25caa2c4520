//! Error taxonomy for sync runs
//!
//! Fetch errors are classified at the HTTP boundary, write errors at the store boundary.
//! Only [`SyncError`] aborts a run; the other two are counted and isolated per unit or batch.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of response body characters kept in a client error
pub const MAX_ERROR_BODY_CHARS: usize = 500;

/// Failure while fetching one request unit
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Non-retryable 4xx (other than 429)
    #[error("HTTP {status}: {body}")]
    Client { status: u16, body: String },

    /// 2xx response whose body is not the expected JSON shape
    #[error("Failed to decode response: {0}")]
    Decode(String),

    /// 429, 5xx, timeout or connection failure
    #[error("Transient failure: {reason}")]
    Transient {
        status: Option<u16>,
        reason: String,
        retry_after: Option<Duration>,
    },

    /// URL could not be built from the request template
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    pub fn client(status: u16, body: &str) -> Self {
        Self::Client {
            status,
            body: truncate_body(body),
        }
    }

    pub fn transient(status: Option<u16>, reason: impl Into<String>) -> Self {
        Self::Transient {
            status,
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// 401 and 403 invalidate every later request against the same provider
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Client { status: 401 | 403, .. })
    }

    /// Server-provided minimum wait, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Client { status, .. } => Some(*status),
            Self::Transient { status, .. } => *status,
            _ => None,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Client { .. } => "client",
            Self::Decode(_) => "decode",
            Self::Transient { .. } => "transient",
            Self::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Keep at most [`MAX_ERROR_BODY_CHARS`] characters of a response body
pub fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorKind {
    /// Constraint or type violation; retrying the same rows cannot succeed
    Rejected,
    /// Deadlock, serialization failure, pool timeout
    Transient,
    /// The connection is gone
    Connection,
}

impl WriteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::Transient => "transient",
            Self::Connection => "connection",
        }
    }
}

impl fmt::Display for WriteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure while writing one batch
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Write {kind}: {message}")]
pub struct WriteError {
    pub kind: WriteErrorKind,
    pub message: String,
}

impl WriteError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            kind: WriteErrorKind::Rejected,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: WriteErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: WriteErrorKind::Connection,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, WriteErrorKind::Transient | WriteErrorKind::Connection)
    }
}

impl From<sqlx::Error> for WriteError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // serialization_failure, deadlock_detected, lock_not_available
                Some("40001") | Some("40P01") | Some("55P03") => Self::transient(err.to_string()),
                // connection_exception class and admin/crash shutdown
                Some(code) if code.starts_with("08") || code.starts_with("57P") => {
                    Self::connection(err.to_string())
                }
                _ => Self::rejected(err.to_string()),
            },
            sqlx::Error::PoolTimedOut => Self::transient(err.to_string()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => Self::connection(err.to_string()),
            _ => Self::rejected(err.to_string()),
        }
    }
}

/// Fatal run errors; any of these moves the run to FAILED
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store connection failed: {0}")]
    StoreConnection(String),

    #[error("Authentication rejected by provider (HTTP {status}) for {unit}")]
    Authentication { unit: String, status: u16 },

    #[error("Store unavailable: {0}")]
    Store(WriteError),
}

impl SyncError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
