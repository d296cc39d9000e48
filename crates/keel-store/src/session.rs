//! Store client seam: connectors open sessions, sessions run statements.
//!
//! The append-only store reports only the committed transaction id for a
//! write (no rows-affected count), so callers that need to know whether a
//! conditional write landed must read the row back.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use keel_settings::StoreSettings;

use crate::errors::Result;
use crate::value::{Row, SqlValue, Statement};

/// Where and as whom to open a session.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    /// Store address (informational for the embedded engine).
    pub address: String,
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// Logical database to select.
    pub database: String,
}

impl ConnectTarget {
    /// Target described by store settings.
    pub fn from_settings(settings: &StoreSettings) -> Self {
        Self {
            address: settings.address.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
            database: settings.database.clone(),
        }
    }
}

impl fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

/// Outcome of a committed write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecSummary {
    /// Id of the transaction that committed the write.
    pub tx_id: u64,
}

/// Opens authenticated sessions against a store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Open a session and select `target.database`.
    async fn open_session(&self, target: &ConnectTarget) -> Result<Arc<dyn StoreSession>>;
}

/// One authenticated channel to the store.
#[async_trait]
pub trait StoreSession: Send + Sync {
    /// Store-assigned session id.
    fn id(&self) -> &str;

    /// Selected logical database.
    fn database(&self) -> &str;

    /// Run one write statement in its own transaction.
    async fn exec(&self, sql: &str, params: &[SqlValue]) -> Result<ExecSummary>;

    /// Run statements atomically in one native transaction.
    async fn exec_batch(&self, statements: &[Statement]) -> Result<ExecSummary>;

    /// Run a read-only query.
    async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;

    /// Run a read-only query expected to yield at most one row.
    async fn query_opt(&self, sql: &str, params: &[SqlValue]) -> Result<Option<Row>> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// Lightweight liveness call.
    async fn health(&self) -> Result<()>;

    /// End the session. Later calls fail with a session-lost error.
    async fn close(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_from_settings() {
        let settings = StoreSettings {
            database: "ledger".into(),
            username: "svc".into(),
            ..Default::default()
        };
        let target = ConnectTarget::from_settings(&settings);
        assert_eq!(target.database, "ledger");
        assert_eq!(target.username, "svc");
        assert_eq!(target.address, "memory");
    }

    #[test]
    fn target_debug_redacts_password() {
        let target = ConnectTarget {
            address: "memory".into(),
            username: "svc".into(),
            password: "s3cret".into(),
            database: "db".into(),
        };
        assert!(!format!("{target:?}").contains("s3cret"));
    }
}
