//! `keel`: migration CLI and boot check for keel services.

#![deny(unsafe_code)]

mod boot;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use keel_core::build_info::BuildInfo;
use keel_migrate::{RunOptions, Severity, validate_dir};
use keel_settings::KeelSettings;
use serde::Serialize;

use crate::boot::Service;

/// keel command line.
#[derive(Parser, Debug)]
#[command(name = "keel", about = "Schema migrations and health for keel ledger services")]
struct Cli {
    /// Settings file (defaults to `~/.keel/settings.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Script directory, overriding `migrations.dir`.
    #[arg(long, global = true)]
    migrations: Option<PathBuf>,

    /// Log level, overriding `logging.level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending migrations.
    Up {
        /// Print the plan without executing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Show applied and pending migrations.
    Status,
    /// Check scripts without touching the store.
    Validate,
    /// Scaffold the next migration script.
    Create {
        /// Description, slugified into the file name.
        name: String,
    },
    /// Print build information.
    Version,
    /// Boot the service and print its health report.
    Health,
}

impl Cli {
    fn migrations_dir(&self, settings: &KeelSettings) -> PathBuf {
        self.migrations
            .clone()
            .unwrap_or_else(|| PathBuf::from(&settings.migrations.dir))
    }
}

fn load_settings(path: Option<&Path>) -> Result<KeelSettings> {
    match path {
        Some(path) => keel_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display())),
        None => keel_settings::load_settings().context("Failed to load settings"),
    }
}

/// Every command runs in a fresh process, so the store has to live on disk
/// for `up` to be visible to a later `status`.
fn with_persistent_store(mut settings: KeelSettings) -> KeelSettings {
    if settings.store.data_dir.is_none() {
        let dir = keel_settings::default_data_dir();
        settings.store.data_dir = Some(dir.to_string_lossy().into_owned());
    }
    settings
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{out}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let settings = with_persistent_store(load_settings(args.config.as_deref())?);

    let level = args.log_level.as_deref().unwrap_or(&settings.logging.level);
    keel_core::logging::init_subscriber(level, args.json_logs || settings.logging.json);

    let dir = args.migrations_dir(&settings);
    tracing::debug!(command = ?args.command, dir = %dir.display(), "keel starting");

    match &args.command {
        Command::Version => print_json(&BuildInfo::current()),
        Command::Validate => {
            let report = validate_dir(&dir)
                .with_context(|| format!("Failed to read {}", dir.display()))?;
            for problem in &report.problems {
                match problem.severity {
                    Severity::Error => tracing::error!(file = %problem.file, "{}", problem.message),
                    Severity::Warning => tracing::warn!(file = %problem.file, "{}", problem.message),
                }
            }
            print_json(&report)?;
            if !report.is_valid() {
                bail!("{} migration script(s) failed validation", report.errors().count());
            }
            Ok(())
        }
        Command::Create { name } => {
            let path = keel_migrate::create_migration(&dir, name)
                .with_context(|| format!("Failed to create migration in {}", dir.display()))?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Up { dry_run } => {
            let mut service = Service::build(&settings, &dir)?;
            if !service.connect().await {
                bail!("store unavailable at {}", settings.store.address);
            }
            let report = service
                .runner
                .run(RunOptions { dry_run: *dry_run })
                .await
                .context("Migration run failed")?;
            print_json(&report)
        }
        Command::Status => {
            let mut service = Service::build(&settings, &dir)?;
            if !service.connect().await {
                bail!("store unavailable at {}", settings.store.address);
            }
            let status = service.runner.status().await.context("Failed to read migration status")?;
            print_json(&status)
        }
        Command::Health => {
            let report = Service::build(&settings, &dir)?
                .boot(&settings.service.name)
                .await?;
            print_json(&report)?;
            if report.health.status == keel_health::HealthStatus::Unhealthy {
                bail!("service is unhealthy");
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_with_flags() {
        let cli = Cli::parse_from(["keel", "up", "--dry-run", "--migrations", "db/scripts"]);
        assert!(matches!(cli.command, Command::Up { dry_run: true }));
        assert_eq!(cli.migrations, Some(PathBuf::from("db/scripts")));
    }

    #[test]
    fn up_defaults_to_real_run() {
        let cli = Cli::parse_from(["keel", "up"]);
        assert!(matches!(cli.command, Command::Up { dry_run: false }));
        assert!(cli.migrations.is_none());
    }

    #[test]
    fn create_takes_name() {
        let cli = Cli::parse_from(["keel", "create", "add ledger index"]);
        assert!(matches!(cli.command, Command::Create { ref name } if name == "add ledger index"));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from(["keel", "status", "--log-level", "debug", "--json-logs", "--config", "/tmp/k.json"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.json_logs);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/k.json")));
    }

    #[test]
    fn missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["keel"]).is_err());
    }

    #[test]
    fn migrations_dir_falls_back_to_settings() {
        let settings = KeelSettings::default();
        let cli = Cli::parse_from(["keel", "validate"]);
        assert_eq!(cli.migrations_dir(&settings), PathBuf::from("migrations"));
        let cli = Cli::parse_from(["keel", "validate", "--migrations", "x"]);
        assert_eq!(cli.migrations_dir(&settings), PathBuf::from("x"));
    }

    #[test]
    fn store_defaults_to_keel_home() {
        let settings = with_persistent_store(KeelSettings::default());
        let dir = settings.store.data_dir.unwrap();
        assert!(PathBuf::from(dir).ends_with(".keel/data"));
    }

    #[test]
    fn configured_data_dir_is_kept() {
        let mut settings = KeelSettings::default();
        settings.store.data_dir = Some("/srv/keel".into());
        let settings = with_persistent_store(settings);
        assert_eq!(settings.store.data_dir.as_deref(), Some("/srv/keel"));
    }

    #[test]
    fn explicit_config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.json");
        std::fs::write(&path, r#"{"service":{"name":"ledger"},"logging":{"level":"warn"}}"#).unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.service.name, "ledger");
        assert_eq!(settings.logging.level, "warn");
    }
}
