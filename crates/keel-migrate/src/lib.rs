//! # keel-migrate
//!
//! Append-only schema evolution.
//!
//! - **Scripts**: `NNN_description.sql` files, discovered and checksummed
//!   by [`script`]
//! - **Validation**: static checks for naming, contiguity, syntax sanity,
//!   and append-only authoring rules ([`validate`])
//! - **Ledger**: the `<service>_schema_migrations` table ([`ledger`])
//! - **Runner**: [`MigrationRunner`] diffs disk against the ledger, warns on
//!   checksum drift, and applies pending scripts in order
//!
//! ## Crate Position
//!
//! Depends on: keel-core, keel-store.
//! Depended on by: keel-health, keel-cli.

#![deny(unsafe_code)]

pub mod errors;
pub mod ledger;
pub mod plan;
pub mod runner;
pub mod scaffold;
pub mod script;
pub mod validate;

pub use errors::{MigrationError, Result};
pub use ledger::{MigrationLedger, MigrationRecord};
pub use plan::{DriftWarning, PendingMigrations};
pub use runner::{AppliedMigration, MigrationRunner, MigrationStatus, RunOptions, RunReport};
pub use scaffold::create_migration;
pub use script::MigrationScript;
pub use validate::{Problem, Severity, ValidationReport, validate_dir};
