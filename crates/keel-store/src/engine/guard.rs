//! Append-only statement rules enforced by the engine.

use rusqlite::{Connection, OptionalExtension};

use crate::engine::txlog::TX_TABLE;
use crate::errors::{Result, StoreError};
use crate::sql;

/// Reject statements that would rewrite history or touch the log directly.
///
/// Runs before the statement reaches `SQLite`; [`check_index`] covers the
/// rule that needs live table state.
pub fn check_write(statement: &str) -> Result<()> {
    if statement.to_ascii_lowercase().contains(TX_TABLE) {
        return Err(StoreError::PermissionDenied(format!(
            "{TX_TABLE} is reserved for the engine"
        )));
    }
    if let Some(reason) = sql::destructive_reason(statement) {
        return Err(StoreError::AppendOnly(format!(
            "statement not permitted on an append-only store: {reason}"
        )));
    }
    if matches!(
        sql::leading_keyword(statement).as_str(),
        "ATTACH" | "DETACH" | "PRAGMA" | "VACUUM"
    ) {
        return Err(StoreError::PermissionDenied(format!(
            "{} is not available to sessions",
            sql::leading_keyword(statement)
        )));
    }
    Ok(())
}

/// Reject index creation on a table that already holds rows.
///
/// An `IF NOT EXISTS` index that already exists is a no-op and passes.
pub fn check_index(conn: &Connection, statement: &str) -> Result<()> {
    let Some(target) = sql::index_target(statement) else {
        return Ok(());
    };
    if target.if_not_exists && object_exists(conn, "index", &target.index)? {
        return Ok(());
    }
    if table_has_rows(conn, &target.table)? {
        return Err(StoreError::AppendOnly(format!(
            "cannot create index {} on non-empty table {}",
            target.index, target.table
        )));
    }
    Ok(())
}

/// Whether a schema object of `kind` (`table`, `index`) exists.
pub fn object_exists(conn: &Connection, kind: &str, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2",
            [kind, name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Whether `table` exists and holds at least one row.
pub fn table_has_rows(conn: &Connection, table: &str) -> Result<bool> {
    if !object_exists(conn, "table", table)? {
        return Ok(false);
    }
    let quoted = table.replace('"', "\"\"");
    let has_rows: bool = conn.query_row(
        &format!("SELECT EXISTS (SELECT 1 FROM \"{quoted}\")"),
        [],
        |row| row.get(0),
    )?;
    Ok(has_rows)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn destructive_writes_rejected() {
        assert_matches!(check_write("DELETE FROM accounts"), Err(StoreError::AppendOnly(_)));
        assert_matches!(check_write("DROP TABLE accounts"), Err(StoreError::AppendOnly(_)));
        assert_matches!(
            check_write("ALTER TABLE accounts DROP COLUMN name"),
            Err(StoreError::AppendOnly(_))
        );
    }

    #[test]
    fn log_table_is_reserved() {
        assert_matches!(
            check_write("INSERT INTO __ledger_tx VALUES (1)"),
            Err(StoreError::PermissionDenied(_))
        );
    }

    #[test]
    fn pragmas_rejected() {
        assert_matches!(
            check_write("PRAGMA foreign_keys = OFF"),
            Err(StoreError::PermissionDenied(_))
        );
    }

    #[test]
    fn additive_writes_pass() {
        check_write("CREATE TABLE IF NOT EXISTS a (x INT)").unwrap();
        check_write("INSERT INTO a VALUES (1)").unwrap();
        check_write("UPDATE a SET x = 2 WHERE x = 1").unwrap();
        check_write("ALTER TABLE a ADD COLUMN y TEXT").unwrap();
    }

    #[test]
    fn index_on_empty_table_passes() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE a (x INT)").unwrap();
        check_index(&conn, "CREATE INDEX idx_a ON a (x)").unwrap();
    }

    #[test]
    fn index_on_missing_table_passes() {
        let conn = Connection::open_in_memory().unwrap();
        check_index(&conn, "CREATE INDEX idx_a ON a (x)").unwrap();
    }

    #[test]
    fn index_on_populated_table_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE a (x INT); INSERT INTO a VALUES (1);")
            .unwrap();
        assert_matches!(
            check_index(&conn, "CREATE INDEX idx_a ON a (x)"),
            Err(StoreError::AppendOnly(_))
        );
    }

    #[test]
    fn existing_index_with_guard_is_noop() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE a (x INT); CREATE INDEX idx_a ON a (x); INSERT INTO a VALUES (1);",
        )
        .unwrap();
        check_index(&conn, "CREATE INDEX IF NOT EXISTS idx_a ON a (x)").unwrap();
    }
}
