//! # keel-store
//!
//! Client side of the append-only ledger store.
//!
//! ## Architecture
//!
//! - **Seam**: [`StoreConnector`] opens [`StoreSession`]s; sessions run
//!   statements and report committed transaction ids
//! - **Engine**: [`LedgerEngine`], an embedded `SQLite`-backed
//!   implementation with session expiry, append-only guards, and a
//!   hash-chained transaction log
//! - **Lifecycle**: [`ConnectionManager`] connects with backoff, reconnects
//!   once inside health checks, and lends the session out as leases
//! - **Errors**: [`StoreError`], produced for driver failures only through
//!   [`classify`]
//!
//! ## Crate Position
//!
//! Depends on: keel-core, keel-settings.
//! Depended on by: keel-migrate, keel-accounts, keel-health, keel-cli.

#![deny(unsafe_code)]

pub mod catalog;
pub mod classify;
pub mod engine;
pub mod errors;
pub mod manager;
pub mod session;
pub mod sql;
pub mod value;

pub use engine::{EngineConfig, LedgerEngine};
pub use errors::{Result, StoreError};
pub use manager::{
    ConnectionManager, ConnectionState, ConnectionStats, HealthReport, ManagerConfig, SessionLease,
};
pub use session::{ConnectTarget, ExecSummary, StoreConnector, StoreSession};
pub use value::{Row, SqlValue, Statement};
