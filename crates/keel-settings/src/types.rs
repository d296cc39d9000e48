//! Settings sections.
//!
//! Keys are `snake_case` so that nested environment overrides map directly
//! (`KEEL_STORE__CONNECT_TIMEOUT_MS` → `store.connect_timeout_ms`).

use std::fmt;
use std::time::Duration;

use keel_core::BackoffConfig;
use serde::{Deserialize, Serialize};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KeelSettings {
    /// Service identity.
    pub service: ServiceSettings,
    /// Store connection settings.
    pub store: StoreSettings,
    /// Migration runner settings.
    pub migrations: MigrationSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

/// Service identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    /// Service name; prefixes the migration ledger table
    /// (`<name>_schema_migrations`).
    pub name: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            name: "accounts".to_string(),
        }
    }
}

/// Connection settings for the append-only store.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Target address reported in health output (`memory` for an ephemeral
    /// embedded engine).
    pub address: String,
    /// Directory holding database files. `None` keeps everything in memory;
    /// the `keel` binary falls back to [`crate::default_data_dir`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Username for session authentication.
    pub username: String,
    /// Password for session authentication.
    pub password: String,
    /// Logical database selected by each session.
    pub database: String,
    /// Connect attempts before giving up.
    pub max_attempts: u32,
    /// Delay before the second connect attempt; doubles afterwards.
    pub base_delay_ms: u64,
    /// Cap on a single backoff delay.
    pub max_delay_ms: u64,
    /// Bound on one session-open attempt.
    pub connect_timeout_ms: u64,
    /// Bound on the liveness call inside a health check.
    pub health_timeout_ms: u64,
    /// Bound on the reconnect attempted inside a health check.
    pub reconnect_timeout_ms: u64,
    /// Idle time after which the embedded engine expires a session.
    pub session_timeout_ms: u64,
    /// Connections per database in the embedded engine.
    pub pool_size: u32,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            address: "memory".to_string(),
            data_dir: None,
            username: "keel".to_string(),
            password: "keel".to_string(),
            database: "defaultdb".to_string(),
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            connect_timeout_ms: 5_000,
            health_timeout_ms: 400,
            reconnect_timeout_ms: 5_000,
            session_timeout_ms: 900_000,
            pool_size: 8,
        }
    }
}

impl StoreSettings {
    /// Backoff schedule for connect attempts.
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            max_attempts: self.max_attempts,
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            ..BackoffConfig::default()
        }
    }

    /// Connect attempt timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Liveness call timeout.
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    /// Reconnect-inside-health-check timeout.
    pub fn reconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.reconnect_timeout_ms)
    }

    /// Session idle expiry.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

impl fmt::Debug for StoreSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreSettings")
            .field("address", &self.address)
            .field("data_dir", &self.data_dir)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .field("max_attempts", &self.max_attempts)
            .field("base_delay_ms", &self.base_delay_ms)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("health_timeout_ms", &self.health_timeout_ms)
            .field("reconnect_timeout_ms", &self.reconnect_timeout_ms)
            .finish_non_exhaustive()
    }
}

/// Migration runner settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationSettings {
    /// Directory scanned for `NNN_description.sql` scripts.
    pub dir: String,
}

impl Default for MigrationSettings {
    fn default() -> Self {
        Self {
            dir: "migrations".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Minimum level (`error`, `warn`, `info`, `debug`, `trace`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
