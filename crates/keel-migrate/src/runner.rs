//! Applies pending scripts through the connection manager.
//!
//! Each script runs as one native store transaction. Its ledger row is
//! appended right after it commits; a failure rolls the script back,
//! appends a `success = 0` row, and stops the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use keel_core::metrics::{MIGRATIONS_APPLIED_TOTAL, MIGRATION_DURATION_SECONDS};
use keel_store::{ConnectionManager, Statement, StoreSession, catalog, sql};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::errors::{MigrationError, Result};
use crate::ledger::{MigrationLedger, MigrationRecord};
use crate::plan::{DriftWarning, Plan, diff};
use crate::scaffold;
use crate::script::{MigrationScript, discover};
use crate::validate::{ValidationReport, validate_dir};

/// Options for [`MigrationRunner::run`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    /// Report the plan without executing anything or writing the ledger.
    pub dry_run: bool,
}

/// Snapshot returned by [`MigrationRunner::status`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStatus {
    /// On-disk scripts already applied.
    pub applied: usize,
    /// On-disk scripts not yet applied.
    pub pending: usize,
    /// Scripts on disk.
    pub total: usize,
    /// Highest applied version (0 when none).
    pub current_version: u32,
    /// Most recent ledger entry, successful or not.
    pub last_run: Option<DateTime<Utc>>,
    /// Pending scripts in the order they would run.
    pub pending_scripts: Vec<String>,
    /// Applied scripts whose file changed since.
    pub drift: Vec<DriftWarning>,
    /// Applied versions with no file on disk.
    pub missing_on_disk: Vec<u32>,
}

/// One script applied by [`MigrationRunner::run`].
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppliedMigration {
    /// Version.
    pub version: u32,
    /// Name.
    pub name: String,
    /// Execution time.
    pub execution_ms: u64,
}

/// Outcome of [`MigrationRunner::run`].
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Whether this was a dry run.
    pub dry_run: bool,
    /// Scripts applied in this run (always empty for a dry run).
    pub applied: Vec<AppliedMigration>,
    /// Scripts that would run (dry run only).
    pub planned: Vec<String>,
    /// Scripts already applied before this run.
    pub already_applied: usize,
    /// Drift found while planning.
    pub drift: Vec<DriftWarning>,
}

impl RunReport {
    /// Whether the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.planned.is_empty()
    }
}

/// Discovers, validates, and applies migration scripts for one service.
pub struct MigrationRunner {
    manager: Arc<ConnectionManager>,
    dir: PathBuf,
    ledger: MigrationLedger,
}

impl MigrationRunner {
    /// Runner for scripts in `dir`, tracked in `<service>_schema_migrations`.
    pub fn new(manager: Arc<ConnectionManager>, dir: impl Into<PathBuf>, service: &str) -> Result<Self> {
        Ok(Self {
            manager,
            dir: dir.into(),
            ledger: MigrationLedger::new(service)?,
        })
    }

    /// Script directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ledger table handle.
    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    /// Diff disk against the ledger. Read-only.
    pub async fn status(&self) -> Result<MigrationStatus> {
        let session = self.manager.require_session()?;
        let records = self.ledger.records(&*session).await?;
        let last_run = records.iter().map(|r| r.applied_at).max();
        let plan = self.plan(records).await?;

        log_plan_warnings(&plan);
        let current_version = plan.pending.latest_applied().unwrap_or(0);
        let Plan {
            pending,
            drift,
            missing_on_disk,
            total,
            applied,
        } = plan;
        let pending_scripts: Vec<String> = pending.map(|s| s.to_string()).collect();

        Ok(MigrationStatus {
            applied,
            pending: pending_scripts.len(),
            total,
            current_version,
            last_run,
            pending_scripts,
            drift,
            missing_on_disk,
        })
    }

    /// Apply every pending script in ascending order.
    ///
    /// Pending versions must continue the latest applied version without
    /// holes; otherwise nothing runs. Stops at the first failure; scripts
    /// applied before it stay applied and recorded.
    pub async fn run(&self, options: RunOptions) -> Result<RunReport> {
        let session = self.manager.require_session()?;
        let records = self.ledger.records(&*session).await?;
        let plan = self.plan(records).await?;
        log_plan_warnings(&plan);

        let latest = plan.pending.latest_applied();
        let mut report = RunReport {
            dry_run: options.dry_run,
            already_applied: plan.applied,
            drift: plan.drift,
            ..RunReport::default()
        };

        let pending: Vec<MigrationScript> = plan.pending.collect();
        check_sequence(&pending, latest)?;

        if !options.dry_run {
            self.ledger.ensure(&*session).await?;
        }

        for script in pending {
            preflight_indexes(&*session, &script).await?;

            if options.dry_run {
                info!(version = script.version, name = %script.name, "would apply migration");
                report.planned.push(script.to_string());
                continue;
            }
            report.applied.push(self.apply(&*session, &script).await?);
        }

        if report.is_noop() {
            info!("schema is up to date");
        } else if !options.dry_run {
            info!(applied = report.applied.len(), "migrations complete");
        }
        Ok(report)
    }

    /// Static checks over the script directory.
    pub fn validate(&self) -> Result<ValidationReport> {
        validate_dir(&self.dir)
    }

    /// Write a new script skeleton and return its path.
    pub fn create_migration(&self, name: &str) -> Result<PathBuf> {
        scaffold::create_migration(&self.dir, name)
    }

    // -- internals --

    async fn plan(&self, records: Vec<MigrationRecord>) -> Result<Plan> {
        let dir = self.dir.clone();
        let scripts = tokio::task::spawn_blocking(move || discover(&dir))
            .await
            .map_err(keel_store::StoreError::from)??;
        Ok(diff(scripts, crate::ledger::applied_from(records)))
    }

    async fn apply(
        &self,
        session: &dyn StoreSession,
        script: &MigrationScript,
    ) -> Result<AppliedMigration> {
        info!(version = script.version, name = %script.name, "applying migration");
        let statements: Vec<Statement> = sql::split_statements(&script.sql)
            .into_iter()
            .map(Statement::new)
            .collect();

        let started = Instant::now();
        let outcome = session.exec_batch(&statements).await;
        let elapsed = started.elapsed();
        let execution_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        let record = MigrationRecord {
            version: script.version,
            name: script.name.clone(),
            checksum: script.checksum.clone(),
            applied_at: Utc::now(),
            execution_ms,
            success: outcome.is_ok(),
        };

        match outcome {
            Ok(summary) => {
                self.ledger.record(session, &record).await?;
                counter!(MIGRATIONS_APPLIED_TOTAL).increment(1);
                histogram!(MIGRATION_DURATION_SECONDS, "version" => script.version.to_string())
                    .record(elapsed.as_secs_f64());
                info!(
                    version = script.version,
                    name = %script.name,
                    execution_ms,
                    tx_id = summary.tx_id,
                    "migration applied"
                );
                Ok(AppliedMigration {
                    version: script.version,
                    name: script.name.clone(),
                    execution_ms,
                })
            }
            Err(source) => {
                error!(version = script.version, name = %script.name, error = %source, "migration failed");
                if let Err(e) = self.ledger.record(session, &record).await {
                    warn!(version = script.version, error = %e, "could not record failed migration");
                }
                Err(MigrationError::Apply {
                    version: script.version,
                    name: script.name.clone(),
                    source,
                })
            }
        }
    }
}

impl std::fmt::Debug for MigrationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationRunner")
            .field("dir", &self.dir)
            .field("ledger", &self.ledger.table())
            .finish_non_exhaustive()
    }
}

fn log_plan_warnings(plan: &Plan) {
    for drift in &plan.drift {
        warn!(
            version = drift.version,
            name = %drift.name,
            recorded = %drift.recorded,
            on_disk = %drift.on_disk,
            "migration checksum drift: applied script changed on disk"
        );
    }
    for version in &plan.missing_on_disk {
        warn!(version, "applied migration missing on disk");
    }
}

/// Pending scripts must continue `latest` one version at a time.
fn check_sequence(pending: &[MigrationScript], latest: Option<u32>) -> Result<()> {
    let mut expected = latest.unwrap_or(0) + 1;
    for script in pending {
        if let Some(latest) = latest.filter(|latest| script.version < *latest) {
            return Err(MigrationError::OutOfOrder {
                version: script.version,
                latest,
            });
        }
        if script.version != expected {
            return Err(MigrationError::Gap {
                expected,
                found: script.version,
            });
        }
        expected += 1;
    }
    Ok(())
}

/// Refuse to run a script that would index a table already holding rows.
async fn preflight_indexes(session: &dyn StoreSession, script: &MigrationScript) -> Result<()> {
    for target in sql::index_targets(&script.sql) {
        if catalog::index_exists(session, &target.index).await? {
            debug!(index = %target.index, "index already exists, skipping preflight");
            continue;
        }
        if catalog::table_has_rows(session, &target.table).await? {
            return Err(MigrationError::IndexPreflight {
                version: script.version,
                name: script.name.clone(),
                detail: format!(
                    "index {} targets table {} which already holds rows",
                    target.index, target.table
                ),
            });
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
