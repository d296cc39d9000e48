//! Error types for the store client and embedded engine.
//!
//! [`StoreError`] is returned by every session, engine, and manager call.
//! Driver failures never leak as raw text: they pass through
//! [`crate::classify`] first, which maps them onto the typed variants
//! below. Callers branch on variants (or [`StoreError::code`]), never on
//! message content.

use std::time::Duration;

use keel_core::ErrorCode;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The session was killed, expired, or is otherwise unknown to the store.
    #[error("session lost: {0}")]
    SessionLost(String),

    /// Authentication or authorization was refused.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness constraint was violated.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// The statement would rewrite or remove history.
    #[error("append-only violation: {0}")]
    AppendOnly(String),

    /// The statement could not be parsed or references unknown objects.
    #[error("invalid statement: {0}")]
    Syntax(String),

    /// A bounded call did not finish in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// No session is installed.
    #[error("not connected to store")]
    NotConnected,

    /// Every connect attempt failed.
    #[error("connect failed after {attempts} attempt(s): {source}")]
    ConnectExhausted {
        /// Attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        #[source]
        source: Box<StoreError>,
    },

    /// The selected logical database does not exist.
    #[error("database not found: {0}")]
    DatabaseNotFound(String),

    /// A row could not be decoded.
    #[error("corrupt row: column '{column}': {detail}")]
    CorruptRow {
        /// Offending column.
        column: String,
        /// What was wrong with it.
        detail: String,
    },

    /// Unclassified database failure.
    #[error("database error: {0}")]
    Database(String),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Internal error (e.g. a blocking task panicked).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the failure means the session is gone and a fresh one is
    /// needed (killed, expired, or credentials revoked after expiry).
    pub fn is_session_lost(&self) -> bool {
        matches!(self, Self::SessionLost(_) | Self::PermissionDenied(_))
    }

    /// Service-wide error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UniqueViolation(_) => ErrorCode::AlreadyExists,
            Self::AppendOnly(_) | Self::Syntax(_) => ErrorCode::InvalidArgument,
            Self::SessionLost(_)
            | Self::PermissionDenied(_)
            | Self::Unavailable(_)
            | Self::Timeout(_)
            | Self::NotConnected
            | Self::ConnectExhausted { .. }
            | Self::Pool(_) => ErrorCode::Unavailable,
            Self::DatabaseNotFound(_)
            | Self::CorruptRow { .. }
            | Self::Database(_)
            | Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Shorthand for a [`StoreError::CorruptRow`].
    pub fn corrupt(column: &str, detail: impl Into<String>) -> Self {
        Self::CorruptRow {
            column: column.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        crate::classify::classify_sqlite(&err)
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {err}"))
    }
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
