//! The `<service>_schema_migrations` ledger table.
//!
//! Append-only: one row per attempt, never updated or deleted. A version
//! counts as applied when it has at least one row with `success = 1`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use keel_store::catalog;
use keel_store::{Row, Statement, StoreSession};
use serde::Serialize;

use crate::errors::{MigrationError, Result};

/// One recorded attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecord {
    /// Script sequence number.
    pub version: u32,
    /// Script description.
    pub name: String,
    /// Checksum of the script body at the time it ran.
    pub checksum: String,
    /// When the attempt finished.
    pub applied_at: DateTime<Utc>,
    /// Wall-clock execution time.
    pub execution_ms: u64,
    /// Whether the script committed.
    pub success: bool,
}

impl MigrationRecord {
    fn from_row(row: &Row) -> keel_store::Result<Self> {
        let version = row.get_i64("version")?;
        let execution_ms = row.get_i64("execution_ms")?;
        Ok(Self {
            version: u32::try_from(version)
                .map_err(|_| keel_store::StoreError::corrupt("version", format!("{version}")))?,
            name: row.get_str("name")?.to_string(),
            checksum: row.get_str("checksum")?.to_string(),
            applied_at: row.get_timestamp("applied_at")?,
            execution_ms: u64::try_from(execution_ms).unwrap_or_default(),
            success: row.get_bool("success")?,
        })
    }
}

/// Handle on one service's ledger table.
#[derive(Clone, Debug)]
pub struct MigrationLedger {
    table: String,
}

impl MigrationLedger {
    /// Ledger for `service`; the table is `<service>_schema_migrations`.
    pub fn new(service: &str) -> Result<Self> {
        let valid = service
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase())
            && service
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(MigrationError::InvalidService(service.to_string()));
        }
        Ok(Self {
            table: format!("{service}_schema_migrations"),
        })
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// DDL for the ledger table.
    pub fn create_statement(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
               version      INTEGER NOT NULL,
               name         TEXT    NOT NULL,
               checksum     TEXT    NOT NULL,
               applied_at   TEXT    NOT NULL,
               execution_ms INTEGER NOT NULL,
               success      INTEGER NOT NULL
             )",
            self.table
        )
    }

    /// Create the table if it is missing.
    pub async fn ensure(&self, session: &dyn StoreSession) -> Result<()> {
        if !catalog::table_exists(session, &self.table).await? {
            let _ = session.exec(&self.create_statement(), &[]).await?;
        }
        Ok(())
    }

    /// Insert statement for one attempt.
    pub fn insert_statement(&self, record: &MigrationRecord) -> Statement {
        Statement::new(format!(
            "INSERT INTO {} (version, name, checksum, applied_at, execution_ms, success)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            self.table
        ))
        .bind(i64::from(record.version))
        .bind(record.name.as_str())
        .bind(record.checksum.as_str())
        .bind(record.applied_at)
        .bind(i64::try_from(record.execution_ms).unwrap_or(i64::MAX))
        .bind(record.success)
    }

    /// Append one attempt.
    pub async fn record(&self, session: &dyn StoreSession, record: &MigrationRecord) -> Result<()> {
        let statement = self.insert_statement(record);
        let _ = session.exec(&statement.sql, &statement.params).await?;
        Ok(())
    }

    /// Every recorded attempt, oldest first. Empty when the table is missing.
    pub async fn records(&self, session: &dyn StoreSession) -> Result<Vec<MigrationRecord>> {
        if !catalog::table_exists(session, &self.table).await? {
            return Ok(Vec::new());
        }
        let rows = session
            .query(
                &format!(
                    "SELECT version, name, checksum, applied_at, execution_ms, success
                     FROM {} ORDER BY applied_at ASC, version ASC",
                    self.table
                ),
                &[],
            )
            .await?;
        rows.iter()
            .map(|row| MigrationRecord::from_row(row).map_err(MigrationError::from))
            .collect()
    }

    /// Successful records keyed by version. The first success wins.
    pub async fn applied(
        &self,
        session: &dyn StoreSession,
    ) -> Result<BTreeMap<u32, MigrationRecord>> {
        Ok(applied_from(self.records(session).await?))
    }
}

/// Successful records keyed by version. The first success wins.
pub(crate) fn applied_from(records: Vec<MigrationRecord>) -> BTreeMap<u32, MigrationRecord> {
    let mut applied = BTreeMap::new();
    for record in records.into_iter().filter(|r| r.success) {
        let _ = applied.entry(record.version).or_insert(record);
    }
    applied
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use keel_store::{ConnectTarget, LedgerEngine, StoreConnector};
    use std::sync::Arc;

    async fn session() -> Arc<dyn StoreSession> {
        let engine = LedgerEngine::in_memory();
        engine.add_user("keel", "pw");
        engine.create_database("db").unwrap();
        engine
            .open_session(&ConnectTarget {
                address: "memory".into(),
                username: "keel".into(),
                password: "pw".into(),
                database: "db".into(),
            })
            .await
            .unwrap()
    }

    fn record(version: u32, success: bool) -> MigrationRecord {
        MigrationRecord {
            version,
            name: format!("m{version}"),
            checksum: "abc".into(),
            applied_at: Utc::now(),
            execution_ms: 3,
            success,
        }
    }

    #[test]
    fn table_name_is_service_scoped() {
        let ledger = MigrationLedger::new("accounts").unwrap();
        assert_eq!(ledger.table(), "accounts_schema_migrations");
        assert!(ledger.create_statement().contains("IF NOT EXISTS"));
    }

    #[test]
    fn rejects_non_identifier_service() {
        assert_matches!(
            MigrationLedger::new("Accounts; DROP"),
            Err(MigrationError::InvalidService(_))
        );
        assert_matches!(MigrationLedger::new(""), Err(MigrationError::InvalidService(_)));
        assert_matches!(MigrationLedger::new("9lives"), Err(MigrationError::InvalidService(_)));
    }

    #[tokio::test]
    async fn missing_table_reads_empty_without_writing() {
        let session = session().await;
        let ledger = MigrationLedger::new("accounts").unwrap();
        assert!(ledger.records(session.as_ref()).await.unwrap().is_empty());
        assert!(
            !catalog::table_exists(session.as_ref(), ledger.table())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn records_round_trip_and_applied_ignores_failures() {
        let session = session().await;
        let ledger = MigrationLedger::new("accounts").unwrap();
        ledger.ensure(session.as_ref()).await.unwrap();
        ledger.ensure(session.as_ref()).await.unwrap();

        ledger.record(session.as_ref(), &record(1, true)).await.unwrap();
        ledger.record(session.as_ref(), &record(2, false)).await.unwrap();

        let records = ledger.records(session.as_ref()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].version, 1);
        assert!(records[0].success);
        assert_eq!(records[0].execution_ms, 3);
        assert!(!records[1].success);

        let applied = ledger.applied(session.as_ref()).await.unwrap();
        assert_eq!(applied.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn first_success_wins() {
        let mut first = record(1, true);
        first.checksum = "first".into();
        let mut second = record(1, true);
        second.checksum = "second".into();
        let applied = applied_from(vec![record(1, false), first, second]);
        assert_eq!(applied[&1].checksum, "first");
    }
}
