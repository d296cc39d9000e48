//! Error types for migration discovery, validation, and execution.

use std::path::PathBuf;

use keel_core::ErrorCode;
use keel_store::StoreError;
use thiserror::Error;

/// Errors that can occur while discovering, validating, or applying
/// migrations.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A `.sql` file does not follow `NNN_description.sql`.
    #[error("invalid migration filename '{0}': expected NNN_description.sql")]
    InvalidFilename(String),

    /// Two scripts share a sequence number.
    #[error("duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        /// Shared version.
        version: u32,
        /// First file seen.
        first: String,
        /// Second file seen.
        second: String,
    },

    /// A pending script sorts below a version already applied.
    #[error("migration {version} is pending but version {latest} is already applied")]
    OutOfOrder {
        /// Pending version.
        version: u32,
        /// Highest applied version.
        latest: u32,
    },

    /// Pending scripts skip a sequence number.
    #[error("migration sequence has a gap: expected version {expected}, found {found}")]
    Gap {
        /// Next version the sequence requires.
        expected: u32,
        /// Version found instead.
        found: u32,
    },

    /// An index would be created on a table that already holds rows.
    #[error("migration {version} ({name}) cannot run: {detail}")]
    IndexPreflight {
        /// Offending version.
        version: u32,
        /// Script name.
        name: String,
        /// Which index and table.
        detail: String,
    },

    /// A script failed inside its transaction.
    #[error("migration {version} ({name}) failed: {source}")]
    Apply {
        /// Failed version.
        version: u32,
        /// Script name.
        name: String,
        /// Store failure.
        #[source]
        source: StoreError,
    },

    /// `create` was given a name that sanitizes to nothing.
    #[error("invalid migration name '{0}'")]
    InvalidName(String),

    /// The ledger table name would not be a valid identifier.
    #[error("invalid service name '{0}' for the migration ledger")]
    InvalidService(String),

    /// Filesystem failure.
    #[error("io error at {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Store failure outside a script (ledger reads, connection).
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MigrationError {
    /// Shorthand for [`MigrationError::Io`].
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Service-wide error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidFilename(_)
            | Self::DuplicateVersion { .. }
            | Self::OutOfOrder { .. }
            | Self::Gap { .. }
            | Self::IndexPreflight { .. }
            | Self::InvalidName(_)
            | Self::InvalidService(_) => ErrorCode::InvalidArgument,
            Self::Apply { source, .. } | Self::Store(source) => source.code(),
            Self::Io { .. } => ErrorCode::Internal,
        }
    }
}

/// Convenience type alias for migration results.
pub type Result<T> = std::result::Result<T, MigrationError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_error_names_script_and_cause() {
        let err = MigrationError::Apply {
            version: 2,
            name: "add_metadata".into(),
            source: StoreError::Syntax("near \"ALTR\": syntax error".into()),
        };
        let text = err.to_string();
        assert!(text.contains("migration 2 (add_metadata) failed"));
        assert!(text.contains("syntax error"));
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn gap_names_both_versions() {
        let err = MigrationError::Gap {
            expected: 2,
            found: 3,
        };
        assert_eq!(
            err.to_string(),
            "migration sequence has a gap: expected version 2, found 3"
        );
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn store_errors_keep_their_code() {
        let err = MigrationError::from(StoreError::NotConnected);
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }

    #[test]
    fn io_display_includes_path() {
        let err = MigrationError::io(
            "/nope/migrations",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/nope/migrations"));
    }
}
