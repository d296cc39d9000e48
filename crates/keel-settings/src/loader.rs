//! Settings loading with layered providers.
//!
//! Loading flow:
//! 1. Start with compiled [`KeelSettings::default()`]
//! 2. If `~/.keel/settings.json` (or an explicit path) exists, merge its
//!    values over the defaults
//! 3. Apply `KEEL_`-prefixed environment overrides (highest priority);
//!    `__` separates nesting levels, so `KEEL_STORE__DATABASE=ledger` sets
//!    `store.database`
//! 4. Validate the merged result

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::KeelSettings;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "KEEL_";

/// Upper bound on connect attempts.
pub const MAX_CONNECT_ATTEMPTS: u32 = 20;

fn keel_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".keel")
}

/// Resolve the path to the settings file (`~/.keel/settings.json`).
pub fn settings_path() -> PathBuf {
    keel_home().join("settings.json")
}

/// Directory for file-backed store data when none is configured
/// (`~/.keel/data`).
pub fn default_data_dir() -> PathBuf {
    keel_home().join("data")
}

/// Build the provider stack for `path` without extracting it.
pub fn figment_for(path: &Path) -> Figment {
    Figment::from(Serialized::defaults(KeelSettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<KeelSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults (plus env). Malformed JSON or a value of
/// the wrong type is an error, as is anything [`validate`] rejects.
pub fn load_settings_from_path(path: &Path) -> Result<KeelSettings> {
    if path.exists() {
        debug!(?path, "loading settings from file");
    } else {
        debug!(?path, "settings file not found, using defaults");
    }
    let settings: KeelSettings = figment_for(path).extract()?;
    validate(&settings)?;
    Ok(settings)
}

/// Check cross-field constraints the type system cannot express.
pub fn validate(settings: &KeelSettings) -> Result<()> {
    if !is_identifier(&settings.service.name) {
        return Err(SettingsError::InvalidValue(format!(
            "service.name must match [a-z][a-z0-9_]*, got '{}'",
            settings.service.name
        )));
    }

    let store = &settings.store;
    if !(1..=MAX_CONNECT_ATTEMPTS).contains(&store.max_attempts) {
        return Err(SettingsError::InvalidValue(format!(
            "store.max_attempts must be 1..={MAX_CONNECT_ATTEMPTS}, got {}",
            store.max_attempts
        )));
    }
    for (key, value) in [
        ("store.connect_timeout_ms", store.connect_timeout_ms),
        ("store.health_timeout_ms", store.health_timeout_ms),
        ("store.reconnect_timeout_ms", store.reconnect_timeout_ms),
        ("store.session_timeout_ms", store.session_timeout_ms),
    ] {
        if value == 0 {
            return Err(SettingsError::InvalidValue(format!("{key} must be > 0")));
        }
    }
    if store.max_delay_ms < store.base_delay_ms {
        return Err(SettingsError::InvalidValue(
            "store.max_delay_ms must be >= store.base_delay_ms".into(),
        ));
    }
    if store.pool_size == 0 {
        return Err(SettingsError::InvalidValue("store.pool_size must be > 0".into()));
    }
    if store.username.trim().is_empty() {
        return Err(SettingsError::InvalidValue("store.username must not be empty".into()));
    }
    if !is_identifier(&store.database) {
        return Err(SettingsError::InvalidValue(format!(
            "store.database must match [a-z][a-z0-9_]*, got '{}'",
            store.database
        )));
    }
    Ok(())
}

/// `[a-z][a-z0-9_]*`
fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use figment::Jail;

    #[test]
    fn default_paths_share_keel_home() {
        let settings = settings_path();
        let data = default_data_dir();
        assert!(data.ends_with(".keel/data"));
        assert_eq!(settings.parent(), data.parent());
    }

    // -- file + env layering --

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.store.database, "defaultdb");
        assert_eq!(settings.service.name, "accounts");
    }

    #[test]
    fn file_values_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "settings.json",
                r#"{"service": {"name": "ledger"}, "store": {"max_attempts": 3}}"#,
            )?;
            let settings = load_settings_from_path(Path::new("settings.json"))
                .map_err(|e| e.to_string())?;
            assert_eq!(settings.service.name, "ledger");
            assert_eq!(settings.store.max_attempts, 3);
            assert_eq!(settings.store.username, "keel");
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", r#"{"store": {"database": "fromfile"}}"#)?;
            jail.set_env("KEEL_STORE__DATABASE", "fromenv");
            jail.set_env("KEEL_STORE__CONNECT_TIMEOUT_MS", "250");
            jail.set_env("KEEL_LOGGING__JSON", "true");
            let settings = load_settings_from_path(Path::new("settings.json"))
                .map_err(|e| e.to_string())?;
            assert_eq!(settings.store.database, "fromenv");
            assert_eq!(settings.store.connect_timeout_ms, 250);
            assert!(settings.logging.json);
            Ok(())
        });
    }

    #[test]
    fn malformed_json_is_error() {
        Jail::expect_with(|jail| {
            jail.create_file("settings.json", "{ not json")?;
            let err = load_settings_from_path(Path::new("settings.json")).unwrap_err();
            assert_matches!(err, SettingsError::Load(_));
            Ok(())
        });
    }

    #[test]
    fn wrong_type_in_env_is_error() {
        Jail::expect_with(|jail| {
            jail.set_env("KEEL_STORE__MAX_ATTEMPTS", "lots");
            let err = load_settings_from_path(Path::new("absent.json")).unwrap_err();
            assert_matches!(err, SettingsError::Load(_));
            Ok(())
        });
    }

    // -- validate --

    #[test]
    fn defaults_validate() {
        validate(&KeelSettings::default()).unwrap();
    }

    #[test]
    fn rejects_bad_service_name() {
        let mut settings = KeelSettings::default();
        settings.service.name = "Accounts-Svc".into();
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn rejects_attempts_out_of_range() {
        let mut settings = KeelSettings::default();
        settings.store.max_attempts = 0;
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(_)));
        settings.store.max_attempts = 21;
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut settings = KeelSettings::default();
        settings.store.health_timeout_ms = 0;
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("store.health_timeout_ms"));
    }

    #[test]
    fn rejects_inverted_delays() {
        let mut settings = KeelSettings::default();
        settings.store.base_delay_ms = 10_000;
        settings.store.max_delay_ms = 100;
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn rejects_blank_username() {
        let mut settings = KeelSettings::default();
        settings.store.username = "  ".into();
        assert_matches!(validate(&settings), Err(SettingsError::InvalidValue(_)));
    }

    #[test]
    fn identifier_rules() {
        assert!(is_identifier("accounts"));
        assert!(is_identifier("a1_b2"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("drop;table"));
    }

    #[test]
    fn settings_path_ends_with_keel_dir() {
        let path = settings_path();
        assert!(path.ends_with(".keel/settings.json"));
    }
}
