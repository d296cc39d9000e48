//! Metric name constants shared across crates.
//!
//! Recording goes through the `metrics` facade at the call site; the binary
//! embedding keel decides which recorder (if any) to install.

/// Store session open attempts (counter, labels: outcome).
pub const STORE_CONNECT_ATTEMPTS_TOTAL: &str = "store_connect_attempts_total";
/// Reconnects performed inside a health check (counter, labels: outcome).
pub const STORE_RECONNECTS_TOTAL: &str = "store_reconnects_total";
/// Whether a store session is currently installed (gauge). 1 = connected.
pub const STORE_CONNECTED: &str = "store_connected";
/// Health check duration seconds (histogram).
pub const STORE_HEALTH_CHECK_DURATION_SECONDS: &str = "store_health_check_duration_seconds";
/// Migrations applied successfully (counter).
pub const MIGRATIONS_APPLIED_TOTAL: &str = "migrations_applied_total";
/// Single migration execution time in seconds (histogram, labels: version).
pub const MIGRATION_DURATION_SECONDS: &str = "migration_duration_seconds";
