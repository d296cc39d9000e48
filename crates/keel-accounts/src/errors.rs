//! Repository errors.

use keel_core::ErrorCode;
use keel_store::StoreError;
use thiserror::Error;

/// Errors returned by the account repository.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Malformed input, a bad page token, or an attempt to change an
    /// immutable field. Raised before anything reaches the store.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// No row with the given key.
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The row moved past the expected version before this write landed.
    #[error("{entity} {id} was modified concurrently (expected version {expected_version}), retry")]
    Aborted {
        /// Entity kind.
        entity: &'static str,
        /// Row id.
        id: String,
        /// Version the caller expected.
        expected_version: i64,
    },

    /// Store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepoError {
    /// Service-wide error code.
    ///
    /// Statement errors from the store are the repository's own fault, so
    /// they surface as `Internal` rather than `InvalidArgument`.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::AlreadyExists(_) => ErrorCode::AlreadyExists,
            Self::Aborted { .. } => ErrorCode::Aborted,
            Self::Store(err) => match err.code() {
                ErrorCode::InvalidArgument => ErrorCode::Internal,
                code => code,
            },
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// Convenience type alias for repository results.
pub type Result<T> = std::result::Result<T, RepoError>;
