//! Hash-chained transaction log.
//!
//! Every committed write appends one entry to `__ledger_tx` inside the same
//! `SQLite` transaction as the write itself. Each entry's hash covers the
//! previous entry's hash, so rewriting any past entry breaks every hash
//! after it.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::{Result, StoreError};
use crate::value::{Statement, format_timestamp};

/// Reserved log table name.
pub const TX_TABLE: &str = "__ledger_tx";

/// `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS __ledger_tx (
    tx_id        INTEGER PRIMARY KEY,
    session_id   TEXT NOT NULL,
    committed_at TEXT NOT NULL,
    payload      TEXT NOT NULL,
    prev_hash    TEXT NOT NULL,
    hash         TEXT NOT NULL
)";

/// Result of walking the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainReport {
    /// Entries checked.
    pub entries: u64,
    /// Hash of the last entry (genesis when empty).
    pub head_hash: String,
    /// First entry whose hash or link does not verify.
    pub first_break: Option<u64>,
}

impl ChainReport {
    /// Whether every entry verified.
    pub fn is_intact(&self) -> bool {
        self.first_break.is_none()
    }
}

/// Create the log table if it does not exist.
pub fn ensure_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn entry_hash(prev_hash: &str, tx_id: u64, committed_at: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(tx_id.to_be_bytes());
    hasher.update(committed_at.as_bytes());
    hasher.update(payload.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Append an entry for `statements`, returning its transaction id.
///
/// Must run inside the transaction that executed the statements.
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
pub fn append(conn: &Connection, session_id: &str, statements: &[Statement]) -> Result<u64> {
    let head: Option<(i64, String)> = conn
        .query_row(
            "SELECT tx_id, hash FROM __ledger_tx ORDER BY tx_id DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (tx_id, prev_hash) = match head {
        Some((id, hash)) => (id as u64 + 1, hash),
        None => (1, GENESIS_HASH.to_string()),
    };

    let payload = serde_json::to_string(statements)
        .map_err(|e| StoreError::Internal(format!("encode tx payload: {e}")))?;
    let committed_at = format_timestamp(&Utc::now());
    let hash = entry_hash(&prev_hash, tx_id, &committed_at, &payload);

    let _ = conn.execute(
        "INSERT INTO __ledger_tx (tx_id, session_id, committed_at, payload, prev_hash, hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![tx_id as i64, session_id, committed_at, payload, prev_hash, hash],
    )?;
    Ok(tx_id)
}

/// Recompute every hash and link from genesis.
#[allow(clippy::cast_sign_loss)]
pub fn verify(conn: &Connection) -> Result<ChainReport> {
    let mut stmt = conn.prepare(
        "SELECT tx_id, committed_at, payload, prev_hash, hash FROM __ledger_tx ORDER BY tx_id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)? as u64,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut expected_prev = GENESIS_HASH.to_string();
    let mut entries = 0;
    let mut first_break = None;
    for row in rows {
        let (tx_id, committed_at, payload, prev_hash, hash) = row?;
        entries += 1;
        if first_break.is_none() {
            let recomputed = entry_hash(&prev_hash, tx_id, &committed_at, &payload);
            if prev_hash != expected_prev || recomputed != hash {
                first_break = Some(tx_id);
            }
        }
        expected_prev = hash;
    }

    Ok(ChainReport {
        entries,
        head_hash: expected_prev,
        first_break,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
