//! Health report types consumed by the health service.

use chrono::{DateTime, Utc};
use keel_store::ConnectionStats;
use serde::Serialize;

/// Health of one dependency or of the whole service.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Working normally.
    Healthy,
    /// Working with reduced capability.
    Degraded,
    /// Not working.
    Unhealthy,
}

/// Kind of dependency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DependencyType {
    /// The ledger store or state kept in it.
    Database,
}

/// Connection-pool numbers attached to a store dependency.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSnapshot {
    /// Open sessions.
    pub open_connections: usize,
    /// Sessions lent out.
    pub in_use: usize,
    /// Sessions idle.
    pub idle: usize,
    /// Sessions opened so far.
    pub total_opened: u64,
    /// Reconnects so far.
    pub reconnects: u64,
    /// Errors since the last successful connect.
    pub error_count: u64,
}

impl From<&ConnectionStats> for PoolSnapshot {
    fn from(stats: &ConnectionStats) -> Self {
        Self {
            open_connections: stats.open_connections,
            in_use: stats.in_use,
            idle: stats.idle,
            total_opened: stats.total_opened,
            reconnects: stats.reconnects,
            error_count: stats.error_count,
        }
    }
}

/// Health of one dependency.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyHealth {
    /// Dependency name.
    pub name: String,
    /// Kind.
    #[serde(rename = "type")]
    pub dependency_type: DependencyType,
    /// Whether the service is unhealthy when this dependency is.
    pub critical: bool,
    /// Status.
    pub status: HealthStatus,
    /// Short human-readable summary.
    pub message: String,
    /// Pool numbers, for store dependencies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolSnapshot>,
    /// Last time the dependency answered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
    /// When this check ran.
    pub last_check: DateTime<Utc>,
    /// Wall time of the check.
    pub response_time_ms: u64,
    /// Failure text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    /// An `UNHEALTHY` entry with only an error.
    pub fn unhealthy(
        name: impl Into<String>,
        critical: bool,
        error: impl Into<String>,
        response_time_ms: u64,
    ) -> Self {
        let error = error.into();
        Self {
            name: name.into(),
            dependency_type: DependencyType::Database,
            critical,
            status: HealthStatus::Unhealthy,
            message: error.clone(),
            pool: None,
            last_success: None,
            last_check: Utc::now(),
            response_time_ms,
            error: Some(error),
        }
    }
}

/// Aggregated service health.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    /// Overall status.
    pub status: HealthStatus,
    /// Per-dependency results, in probe order.
    pub dependencies: Vec<DependencyHealth>,
    /// When the aggregate check finished.
    pub checked_at: DateTime<Utc>,
}

impl ServiceHealth {
    /// Overall status from dependency results.
    ///
    /// A critical dependency that is unhealthy makes the service unhealthy;
    /// anything else short of healthy degrades it.
    pub fn overall(dependencies: &[DependencyHealth]) -> HealthStatus {
        dependencies
            .iter()
            .map(|d| match d.status {
                HealthStatus::Unhealthy if !d.critical => HealthStatus::Degraded,
                status => status,
            })
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn dep(status: HealthStatus, critical: bool) -> DependencyHealth {
        DependencyHealth {
            status,
            ..DependencyHealth::unhealthy("x", critical, "e", 0)
        }
    }

    #[test]
    fn overall_status_rules() {
        assert_eq!(ServiceHealth::overall(&[]), HealthStatus::Healthy);
        assert_eq!(
            ServiceHealth::overall(&[dep(HealthStatus::Healthy, true)]),
            HealthStatus::Healthy
        );
        assert_eq!(
            ServiceHealth::overall(&[
                dep(HealthStatus::Healthy, true),
                dep(HealthStatus::Degraded, false)
            ]),
            HealthStatus::Degraded
        );
        assert_eq!(
            ServiceHealth::overall(&[
                dep(HealthStatus::Healthy, true),
                dep(HealthStatus::Unhealthy, false)
            ]),
            HealthStatus::Degraded
        );
        assert_eq!(
            ServiceHealth::overall(&[
                dep(HealthStatus::Unhealthy, true),
                dep(HealthStatus::Healthy, false)
            ]),
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn serializes_wire_names() {
        let json = serde_json::to_value(dep(HealthStatus::Unhealthy, true)).unwrap();
        assert_eq!(json["status"], "UNHEALTHY");
        assert_eq!(json["type"], "DATABASE");
        assert_eq!(json["critical"], true);
        assert_eq!(json["error"], "e");
        assert!(json.get("pool").is_none());
        assert!(json["lastCheck"].is_string());
    }
}
