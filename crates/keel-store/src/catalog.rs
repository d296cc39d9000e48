//! Schema introspection through a session.
//!
//! Read-only catalog lookups used by callers that must decide before
//! writing (migration preflight, ledger bootstrap).

use crate::errors::Result;
use crate::session::StoreSession;
use crate::value::SqlValue;

async fn object_exists(session: &dyn StoreSession, kind: &str, name: &str) -> Result<bool> {
    let row = session
        .query_opt(
            "SELECT 1 AS found FROM sqlite_master WHERE type = ?1 AND name = ?2",
            &[SqlValue::from(kind), SqlValue::from(name)],
        )
        .await?;
    Ok(row.is_some())
}

/// Whether `table` exists.
pub async fn table_exists(session: &dyn StoreSession, table: &str) -> Result<bool> {
    object_exists(session, "table", table).await
}

/// Whether `index` exists.
pub async fn index_exists(session: &dyn StoreSession, index: &str) -> Result<bool> {
    object_exists(session, "index", index).await
}

/// Whether `table` exists and holds at least one row.
pub async fn table_has_rows(session: &dyn StoreSession, table: &str) -> Result<bool> {
    if !table_exists(session, table).await? {
        return Ok(false);
    }
    let quoted = table.replace('"', "\"\"");
    let row = session
        .query_opt(
            &format!("SELECT EXISTS (SELECT 1 FROM \"{quoted}\") AS has_rows"),
            &[],
        )
        .await?;
    match row {
        Some(row) => row.get_bool("has_rows"),
        None => Ok(false),
    }
}

#[cfg(test)]
#[allow(unused_results)]
mod tests {
    use super::*;
    use crate::engine::LedgerEngine;
    use crate::session::{ConnectTarget, StoreConnector};

    #[tokio::test]
    async fn lookups_follow_schema_changes() {
        let engine = LedgerEngine::in_memory();
        engine.add_user("keel", "pw");
        engine.create_database("db").unwrap();
        let session = engine
            .open_session(&ConnectTarget {
                address: "memory".into(),
                username: "keel".into(),
                password: "pw".into(),
                database: "db".into(),
            })
            .await
            .unwrap();
        let session = session.as_ref();

        assert!(!table_exists(session, "t").await.unwrap());
        assert!(!table_has_rows(session, "t").await.unwrap());

        session.exec("CREATE TABLE t (x INTEGER)", &[]).await.unwrap();
        session.exec("CREATE INDEX idx_t ON t (x)", &[]).await.unwrap();
        assert!(table_exists(session, "t").await.unwrap());
        assert!(index_exists(session, "idx_t").await.unwrap());
        assert!(!table_has_rows(session, "t").await.unwrap());

        session.exec("INSERT INTO t VALUES (1)", &[]).await.unwrap();
        assert!(table_has_rows(session, "t").await.unwrap());
    }
}
