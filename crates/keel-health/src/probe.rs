//! Probes that turn component state into [`DependencyHealth`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use keel_migrate::MigrationRunner;
use keel_store::ConnectionManager;

use crate::types::{DependencyHealth, DependencyType, HealthStatus, PoolSnapshot};

/// One dependency check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Dependency name used in reports.
    fn name(&self) -> &str;

    /// Whether the service is unhealthy when this dependency is.
    fn critical(&self) -> bool;

    /// Run the check. Never fails; failures are reported in the result.
    async fn check(&self) -> DependencyHealth;
}

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// Store liveness through [`ConnectionManager::check_health`], which
/// reconnects once on session loss.
pub struct StoreProbe {
    manager: Arc<ConnectionManager>,
    name: String,
}

impl StoreProbe {
    /// Probe named `store`.
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self {
            manager,
            name: "store".into(),
        }
    }
}

#[async_trait]
impl HealthProbe for StoreProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn critical(&self) -> bool {
        true
    }

    async fn check(&self) -> DependencyHealth {
        let report = self.manager.check_health().await;
        let stats = self.manager.stats();
        let (status, message) = if report.healthy && report.reconnected {
            (HealthStatus::Healthy, "session restored after reconnect".to_string())
        } else if report.healthy {
            (HealthStatus::Healthy, format!("connected ({})", report.state))
        } else {
            (HealthStatus::Unhealthy, format!("store unreachable ({})", report.state))
        };

        DependencyHealth {
            name: self.name.clone(),
            dependency_type: DependencyType::Database,
            critical: self.critical(),
            status,
            message,
            pool: Some(PoolSnapshot::from(&stats)),
            last_success: stats.last_success,
            last_check: report.checked_at,
            response_time_ms: report.response_time_ms,
            error: report.error,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Migrations
// ─────────────────────────────────────────────────────────────────────────────

/// Schema state: pending scripts or checksum drift degrade the service.
pub struct MigrationProbe {
    runner: Arc<MigrationRunner>,
    name: String,
}

impl MigrationProbe {
    /// Probe named `migrations`.
    pub fn new(runner: Arc<MigrationRunner>) -> Self {
        Self {
            runner,
            name: "migrations".into(),
        }
    }
}

#[async_trait]
impl HealthProbe for MigrationProbe {
    fn name(&self) -> &str {
        &self.name
    }

    fn critical(&self) -> bool {
        false
    }

    async fn check(&self) -> DependencyHealth {
        let started = Instant::now();
        let result = self.runner.status().await;
        let response_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let status = match result {
            Ok(status) => status,
            Err(err) => {
                return DependencyHealth::unhealthy(
                    &self.name,
                    self.critical(),
                    err.to_string(),
                    response_time_ms,
                );
            }
        };

        let (health, message) = if status.pending > 0 {
            (
                HealthStatus::Degraded,
                format!("{} of {} migrations pending", status.pending, status.total),
            )
        } else if !status.drift.is_empty() {
            (
                HealthStatus::Degraded,
                format!("{} applied migrations changed on disk", status.drift.len()),
            )
        } else {
            (
                HealthStatus::Healthy,
                format!("schema at version {}", status.current_version),
            )
        };

        let now = Utc::now();
        DependencyHealth {
            name: self.name.clone(),
            dependency_type: DependencyType::Database,
            critical: self.critical(),
            status: health,
            message,
            pool: None,
            last_success: Some(now),
            last_check: now,
            response_time_ms,
            error: None,
        }
    }
}
