//! Runs every probe concurrently under one deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::probe::HealthProbe;
use crate::types::{DependencyHealth, ServiceHealth};

/// Aggregate deadline for one health request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

/// Collects probes and reports overall service health.
pub struct HealthAggregator {
    probes: Vec<Arc<dyn HealthProbe>>,
    timeout: Duration,
}

impl Default for HealthAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl HealthAggregator {
    /// Aggregator with a per-request deadline.
    pub fn new(timeout: Duration) -> Self {
        Self {
            probes: Vec::new(),
            timeout,
        }
    }

    /// Add a probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Number of registered probes.
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    /// Whether no probe is registered.
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }

    /// Run all probes. A probe that misses the deadline is reported
    /// `UNHEALTHY` and its future is dropped.
    pub async fn check(&self) -> ServiceHealth {
        let timeout = self.timeout;
        let checks = self.probes.iter().map(|probe| async move {
            let started = Instant::now();
            match tokio::time::timeout(timeout, probe.check()).await {
                Ok(health) => health,
                Err(_) => {
                    warn!(probe = probe.name(), ?timeout, "health probe timed out");
                    DependencyHealth::unhealthy(
                        probe.name(),
                        probe.critical(),
                        format!("health check timed out after {}ms", timeout.as_millis()),
                        u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    )
                }
            }
        });
        let dependencies = join_all(checks).await;
        let status = ServiceHealth::overall(&dependencies);
        debug!(?status, dependencies = dependencies.len(), "health checked");

        ServiceHealth {
            status,
            dependencies,
            checked_at: Utc::now(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
