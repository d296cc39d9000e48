//! Service-wide error codes.
//!
//! Every domain error in the workspace maps onto one [`ErrorCode`]. The
//! transport layer translates codes to wire status values; nothing below
//! the transport ever inspects another crate's error message text.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failure taxonomy shared by the repository, migration, and store layers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed input or an attempt to modify an immutable field.
    InvalidArgument,
    /// The addressed entity does not exist.
    NotFound,
    /// A uniqueness constraint was violated.
    AlreadyExists,
    /// Optimistic concurrency conflict; retry with a fresh read.
    Aborted,
    /// The store is unreachable or the session is gone.
    Unavailable,
    /// Unexpected failure.
    Internal,
}

impl ErrorCode {
    /// Wire representation (`INVALID_ARGUMENT`, `NOT_FOUND`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::NotFound => "NOT_FOUND",
            Self::AlreadyExists => "ALREADY_EXISTS",
            Self::Aborted => "ABORTED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether a client may retry the same request.
    ///
    /// `Aborted` needs a fresh read first; `Unavailable` needs backoff.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Aborted | Self::Unavailable)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
