//! Optimistic concurrency for version-tracked tables.
//!
//! The store reports no rows-affected count, so a conditional write cannot
//! tell by itself whether it matched. Every write therefore stamps a fresh
//! `revision` token alongside `version = expected + 1`, and the row is read
//! back: the write landed iff the row carries both the next version and
//! this call's token. Two writers racing on the same expected version can
//! both see the advanced version, but only one sees its own token.
//!
//! Any table using this module needs `id`, `version`, `revision`, and
//! `updated_at` columns.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use keel_core::ids::new_token;
use keel_store::{Row, SqlValue, Statement, StoreSession};
use tracing::debug;

use crate::errors::Result;

/// A conditional update keyed on `(id, expected_version)`.
#[derive(Clone, Debug)]
pub struct VersionedUpdate {
    table: &'static str,
    id: String,
    expected_version: i64,
    assignments: Vec<(&'static str, SqlValue)>,
}

/// What the read-back found.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOutcome {
    /// This call's write is the current version of the row.
    Applied(Row),
    /// The row exists but this call's write did not land.
    Conflict {
        /// Version the row carries now.
        current_version: i64,
    },
    /// No row with that id.
    Missing,
}

impl VersionedUpdate {
    /// Start an update of `table` row `id`, expected at `expected_version`.
    pub fn new(table: &'static str, id: impl Into<String>, expected_version: i64) -> Self {
        Self {
            table,
            id: id.into(),
            expected_version,
            assignments: Vec::new(),
        }
    }

    /// Set `column` to `value`.
    pub fn set(&mut self, column: &'static str, value: impl Into<SqlValue>) {
        self.assignments.push((column, value.into()));
    }

    /// Whether no column has been set.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Version the row carries if this update lands.
    pub fn next_version(&self) -> i64 {
        self.expected_version + 1
    }

    /// Build the guarded `UPDATE`.
    pub fn statement(&self, revision: &str, now: DateTime<Utc>) -> Statement {
        let mut sql = format!("UPDATE {} SET ", self.table);
        let mut params: Vec<SqlValue> = Vec::with_capacity(self.assignments.len() + 5);
        for (column, value) in &self.assignments {
            params.push(value.clone());
            let _ = write!(sql, "{column} = ?{}, ", params.len());
        }
        params.push(SqlValue::from(self.next_version()));
        let _ = write!(sql, "version = ?{}, ", params.len());
        params.push(SqlValue::from(revision));
        let _ = write!(sql, "revision = ?{}, ", params.len());
        params.push(SqlValue::from(now));
        let _ = write!(sql, "updated_at = ?{}", params.len());
        params.push(SqlValue::from(self.id.as_str()));
        let _ = write!(sql, " WHERE id = ?{}", params.len());
        params.push(SqlValue::from(self.expected_version));
        let _ = write!(sql, " AND version = ?{}", params.len());

        Statement { sql, params }
    }

    /// Run the update and read the row back with `columns`.
    ///
    /// `columns` must include `version` and `revision`.
    pub async fn execute(
        &self,
        session: &dyn StoreSession,
        columns: &str,
        now: DateTime<Utc>,
    ) -> Result<WriteOutcome> {
        let revision = new_token();
        let statement = self.statement(&revision, now);
        let summary = session.exec(&statement.sql, &statement.params).await?;
        debug!(
            table = self.table,
            id = %self.id,
            expected_version = self.expected_version,
            tx_id = summary.tx_id,
            "conditional update committed"
        );

        let row = session
            .query_opt(
                &format!("SELECT {columns} FROM {} WHERE id = ?1", self.table),
                &[SqlValue::from(self.id.as_str())],
            )
            .await?;
        Ok(verify(row, self.next_version(), &revision)?)
    }
}

/// Decide whether the write identified by `revision` produced `row`.
pub fn verify(row: Option<Row>, next_version: i64, revision: &str) -> keel_store::Result<WriteOutcome> {
    let Some(row) = row else {
        return Ok(WriteOutcome::Missing);
    };
    let current_version = row.get_i64("version")?;
    if current_version == next_version && row.get_str("revision")? == revision {
        Ok(WriteOutcome::Applied(row))
    } else {
        Ok(WriteOutcome::Conflict { current_version })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn row(version: i64, revision: &str) -> Row {
        Row::new(
            Arc::from(vec!["version".to_string(), "revision".to_string()]),
            vec![SqlValue::from(version), SqlValue::from(revision)],
        )
    }

    #[test]
    fn statement_sets_fields_then_bookkeeping() {
        let mut update = VersionedUpdate::new("accounts", "acct_1", 4);
        update.set("name", "Renamed");
        update.set("status", "frozen");
        let now = Utc::now();
        let stmt = update.statement("rev-1", now);

        assert_eq!(
            stmt.sql,
            "UPDATE accounts SET name = ?1, status = ?2, version = ?3, revision = ?4, \
             updated_at = ?5 WHERE id = ?6 AND version = ?7"
        );
        assert_eq!(
            stmt.params,
            vec![
                SqlValue::from("Renamed"),
                SqlValue::from("frozen"),
                SqlValue::from(5_i64),
                SqlValue::from("rev-1"),
                SqlValue::from(now),
                SqlValue::from("acct_1"),
                SqlValue::from(4_i64),
            ]
        );
    }

    #[test]
    fn verify_requires_version_and_revision() {
        assert_eq!(verify(None, 2, "mine").unwrap(), WriteOutcome::Missing);
        assert_eq!(
            verify(Some(row(2, "mine")), 2, "mine").unwrap(),
            WriteOutcome::Applied(row(2, "mine"))
        );
        // Someone else won the race to version 2.
        assert_eq!(
            verify(Some(row(2, "theirs")), 2, "mine").unwrap(),
            WriteOutcome::Conflict { current_version: 2 }
        );
        // Later writes moved the row on.
        assert_eq!(
            verify(Some(row(7, "theirs")), 2, "mine").unwrap(),
            WriteOutcome::Conflict { current_version: 7 }
        );
    }

    #[test]
    fn empty_update_reports_empty() {
        let update = VersionedUpdate::new("accounts", "acct_1", 1);
        assert!(update.is_empty());
        assert_eq!(update.next_version(), 2);
    }

    #[test]
    fn each_set_adds_one_assignment() {
        let mut update = VersionedUpdate::new("accounts", "acct_1", 1);
        update.set("name", "A");
        assert!(!update.is_empty());
        update.set("name", "B");
        let stmt = update.statement("rev", Utc::now());
        assert!(stmt.sql.starts_with("UPDATE accounts SET name = ?1, name = ?2, version = ?3"));
        assert_eq!(stmt.params[1], SqlValue::from("B"));
    }

    #[test]
    fn committed_write_overtaken_before_read_back_is_a_conflict() {
        // Ours committed version 2, a third writer already moved it to 3.
        let overtaken = row(3, "third");
        assert_eq!(
            verify(Some(overtaken), 2, "ours").unwrap(),
            WriteOutcome::Conflict { current_version: 3 }
        );
    }
}
