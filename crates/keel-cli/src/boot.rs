//! Service wiring shared by the subcommands.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use keel_accounts::AccountRepository;
use keel_health::{HealthAggregator, MigrationProbe, ServiceHealth, StoreProbe};
use keel_migrate::{MigrationRunner, RunOptions, RunReport};
use keel_settings::KeelSettings;
use keel_store::{ConnectionManager, LedgerEngine, ManagerConfig};
use serde::Serialize;

/// Store, migration runner, and repositories for one service.
pub struct Service {
    /// Store connection lifecycle.
    pub manager: Arc<ConnectionManager>,
    /// Migration runner over the configured script directory.
    pub runner: Arc<MigrationRunner>,
    /// `None` while the store is unreachable.
    pub accounts: Option<AccountRepository>,
}

/// What `keel health` prints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BootReport {
    pub service: String,
    pub account_writes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrations: Option<RunReport>,
    pub health: ServiceHealth,
}

impl Service {
    /// Wire the embedded engine described by `settings`.
    pub fn build(settings: &KeelSettings, migrations_dir: &Path) -> Result<Self> {
        let engine = LedgerEngine::from_settings(&settings.store)
            .context("Failed to open ledger store")?;
        Self::with_engine(settings, engine, migrations_dir)
    }

    /// Wire an already provisioned engine.
    pub fn with_engine(settings: &KeelSettings, engine: LedgerEngine, migrations_dir: &Path) -> Result<Self> {
        let manager = Arc::new(ConnectionManager::new(
            Arc::new(engine),
            ManagerConfig::from_settings(&settings.store),
        ));
        let runner = MigrationRunner::new(Arc::clone(&manager), migrations_dir, &settings.service.name)
            .with_context(|| format!("Invalid service name: {}", settings.service.name))?;
        Ok(Self {
            manager,
            runner: Arc::new(runner),
            accounts: None,
        })
    }

    /// Connect to the store. A failure is logged and leaves the service
    /// storage-degraded with account writes disabled.
    pub async fn connect(&mut self) -> bool {
        match self.manager.connect().await {
            Ok(()) => {
                self.accounts = Some(AccountRepository::new(Arc::clone(&self.manager)));
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "store unavailable, starting storage-degraded (account writes disabled)");
                false
            }
        }
    }

    /// Full boot: connect, apply migrations, report health.
    ///
    /// Migration failures are fatal. Without a store there is nothing to
    /// migrate and the report says so.
    pub async fn boot(mut self, service_name: &str) -> Result<BootReport> {
        let migrations = if self.connect().await {
            let report = self
                .runner
                .run(RunOptions::default())
                .await
                .context("Failed to apply migrations")?;
            Some(report)
        } else {
            None
        };

        let health = self.health().check().await;
        tracing::info!(status = ?health.status, account_writes = self.accounts.is_some(), "boot complete");
        Ok(BootReport {
            service: service_name.to_string(),
            account_writes: self.accounts.is_some(),
            migrations,
            health,
        })
    }

    /// Store and migration probes under the default deadline.
    pub fn health(&self) -> HealthAggregator {
        HealthAggregator::default()
            .with_probe(Arc::new(StoreProbe::new(Arc::clone(&self.manager))))
            .with_probe(Arc::new(MigrationProbe::new(Arc::clone(&self.runner))))
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use keel_health::HealthStatus;
    use std::path::PathBuf;

    fn shipped_migrations() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations")
    }

    fn fast_settings() -> KeelSettings {
        let mut settings = KeelSettings::default();
        settings.store.max_attempts = 2;
        settings.store.base_delay_ms = 1;
        settings.store.max_delay_ms = 2;
        settings
    }

    #[tokio::test]
    async fn boot_applies_shipped_migrations() {
        let settings = fast_settings();
        let service = Service::build(&settings, &shipped_migrations()).unwrap();
        let report = service.boot("accounts").await.unwrap();

        assert!(report.account_writes);
        assert_eq!(report.migrations.unwrap().applied.len(), 2);
        assert_eq!(report.health.status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn unreachable_store_boots_degraded() {
        let settings = fast_settings();
        let engine = LedgerEngine::from_settings(&settings.store).unwrap();
        engine.set_online(false);
        let service = Service::with_engine(&settings, engine, &shipped_migrations()).unwrap();
        let report = service.boot("accounts").await.unwrap();

        assert!(!report.account_writes);
        assert!(report.migrations.is_none());
        assert_eq!(report.health.status, HealthStatus::Unhealthy);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["accountWrites"], false);
        assert!(json.get("migrations").is_none());
    }

    #[tokio::test]
    async fn broken_migration_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("001_broken.sql"), "CREATE TABLE IF NOT EXISTS (;").unwrap();
        let service = Service::build(&fast_settings(), dir.path()).unwrap();
        let err = service.boot("accounts").await.unwrap_err();
        assert!(err.to_string().contains("migrations"));
    }

    #[tokio::test]
    async fn applied_versions_outlive_the_process() {
        let data = tempfile::tempdir().unwrap();
        let mut settings = fast_settings();
        settings.store.data_dir = Some(data.path().to_string_lossy().into_owned());

        {
            let mut up = Service::build(&settings, &shipped_migrations()).unwrap();
            assert!(up.connect().await);
            let report = up.runner.run(RunOptions::default()).await.unwrap();
            assert_eq!(report.applied.len(), 2);
            up.manager.disconnect().await.unwrap();
        }

        let mut later = Service::build(&settings, &shipped_migrations()).unwrap();
        assert!(later.connect().await);
        let status = later.runner.status().await.unwrap();
        assert_eq!(status.applied, 2);
        assert_eq!(status.pending, 0);
        assert_eq!(status.current_version, 2);
    }

    #[test]
    fn rejects_bad_service_name() {
        let mut settings = fast_settings();
        settings.service.name = "no spaces".into();
        assert!(Service::build(&settings, Path::new("migrations")).is_err());
    }
}
