//! Central error classification at the store-client boundary.
//!
//! Driver errors arrive either as typed `SQLite` result codes or as bare
//! message text. Both are mapped here, once, onto [`StoreError`] variants:
//!
//! 1. Typed codes first (constraint, busy, auth, cannot-open)
//! 2. Then an ordered pattern table over the lower-cased message
//! 3. Anything unmatched becomes [`StoreError::Database`]
//!
//! Nothing outside this module inspects error text.

use rusqlite::ffi;

use crate::errors::StoreError;

// ─────────────────────────────────────────────────────────────────────────────
// Pattern table
// ─────────────────────────────────────────────────────────────────────────────

/// Which [`StoreError`] variant a matched message becomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// Uniqueness violation.
    UniqueViolation,
    /// Session gone.
    SessionLost,
    /// Authentication or authorization refused.
    PermissionDenied,
    /// Store unreachable or busy.
    Unavailable,
    /// Bad statement or unknown object.
    Syntax,
    /// History-rewriting statement.
    AppendOnly,
}

struct MessagePattern {
    check: fn(&str) -> bool,
    class: FailureClass,
}

/// Known message patterns, checked in order against lower-cased text.
fn patterns() -> &'static [MessagePattern] {
    static PATTERNS: &[MessagePattern] = &[
        MessagePattern {
            check: |s| s.contains("unique constraint") || s.contains("duplicate key"),
            class: FailureClass::UniqueViolation,
        },
        MessagePattern {
            check: |s| s.contains("session not found") || s.contains("session expired"),
            class: FailureClass::SessionLost,
        },
        MessagePattern {
            check: |s| {
                s.contains("permission denied")
                    || s.contains("authentication failed")
                    || s.contains("not authorized")
            },
            class: FailureClass::PermissionDenied,
        },
        MessagePattern {
            check: |s| {
                s.contains("connection refused")
                    || s.contains("unavailable")
                    || s.contains("database is locked")
                    || s.contains("broken pipe")
            },
            class: FailureClass::Unavailable,
        },
        MessagePattern {
            check: |s| s.contains("append-only") || s.contains("not permitted"),
            class: FailureClass::AppendOnly,
        },
        MessagePattern {
            check: |s| {
                s.contains("syntax error")
                    || s.contains("no such table")
                    || s.contains("no such column")
                    || s.contains("incomplete input")
            },
            class: FailureClass::Syntax,
        },
    ];
    PATTERNS
}

/// Match a message against the pattern table.
pub fn match_message(message: &str) -> Option<FailureClass> {
    let lower = message.to_lowercase();
    patterns()
        .iter()
        .find(|p| (p.check)(&lower))
        .map(|p| p.class)
}

/// Classify bare error text.
pub fn classify_message(message: &str) -> StoreError {
    let message = message.to_string();
    match match_message(&message) {
        Some(class) => build(class, message),
        None => StoreError::Database(message),
    }
}

/// Classify a `rusqlite` error.
pub fn classify_sqlite(err: &rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(failure, detail) = err {
        let message = detail.clone().unwrap_or_else(|| failure.to_string());
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return StoreError::UniqueViolation(message);
            }
            _ => {}
        }
        match failure.code {
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                return StoreError::Unavailable(message);
            }
            rusqlite::ErrorCode::CannotOpen => return StoreError::Unavailable(message),
            rusqlite::ErrorCode::AuthorizationForStatementDenied
            | rusqlite::ErrorCode::PermissionDenied => {
                return StoreError::PermissionDenied(message);
            }
            _ => {}
        }
        return classify_message(&message);
    }
    classify_message(&err.to_string())
}

fn build(class: FailureClass, message: String) -> StoreError {
    match class {
        FailureClass::UniqueViolation => StoreError::UniqueViolation(message),
        FailureClass::SessionLost => StoreError::SessionLost(message),
        FailureClass::PermissionDenied => StoreError::PermissionDenied(message),
        FailureClass::Unavailable => StoreError::Unavailable(message),
        FailureClass::Syntax => StoreError::Syntax(message),
        FailureClass::AppendOnly => StoreError::AppendOnly(message),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
