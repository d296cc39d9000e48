//! Settings error types.

use thiserror::Error;

/// Errors that can occur when loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A provider failed or a value could not be extracted.
    #[error("failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

impl From<figment::Error> for SettingsError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("store.max_attempts must be 1..=20".into());
        assert_eq!(
            err.to_string(),
            "invalid settings value: store.max_attempts must be 1..=20"
        );
    }

    #[test]
    fn figment_error_converts() {
        let err: SettingsError = figment::Error::from("boom".to_string()).into();
        assert!(matches!(err, SettingsError::Load(_)));
        assert!(err.to_string().contains("boom"));
    }
}
