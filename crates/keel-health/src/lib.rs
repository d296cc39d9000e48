//! # keel-health
//!
//! Uniform dependency-health reporting.
//!
//! - [`HealthProbe`]: one dependency check
//! - [`StoreProbe`]: store liveness, with one transparent reconnect
//! - [`MigrationProbe`]: pending scripts and checksum drift
//! - [`HealthAggregator`]: runs probes concurrently under one deadline
//!
//! ## Crate Position
//!
//! Depends on: keel-store, keel-migrate.
//! Depended on by: keel-cli.

#![deny(unsafe_code)]

pub mod aggregator;
pub mod probe;
pub mod types;

pub use aggregator::HealthAggregator;
pub use probe::{HealthProbe, MigrationProbe, StoreProbe};
pub use types::{DependencyHealth, DependencyType, HealthStatus, PoolSnapshot, ServiceHealth};
