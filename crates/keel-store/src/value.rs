//! Bound parameters, statements, and decoded rows.
//!
//! Timestamps travel as RFC 3339 text with microsecond precision and a `Z`
//! suffix, so lexical order equals chronological order in `ORDER BY`.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, ValueRef};
use serde::Serialize;

use crate::errors::{Result, StoreError};

// ─────────────────────────────────────────────────────────────────────────────
// Values
// ─────────────────────────────────────────────────────────────────────────────

/// A single bound parameter or decoded column value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL `NULL`.
    Null,
    /// 64-bit integer.
    Integer(i64),
    /// Floating point.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Boolean, stored as `0`/`1`.
    Bool(bool),
    /// UTC timestamp, stored as RFC 3339 text.
    Timestamp(DateTime<Utc>),
    /// Raw bytes.
    Blob(Vec<u8>),
}

impl SqlValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Bool(_) => "bool",
            Self::Timestamp(_) => "timestamp",
            Self::Blob(_) => "blob",
        }
    }

    fn from_value_ref(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Bool(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Self::Timestamp(ts) => ToSqlOutput::from(format_timestamp(ts)),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<DateTime<Utc>> for SqlValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Render a timestamp the way it is stored.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(column: &str, text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(column, format!("bad timestamp '{text}': {e}")))
}

// ─────────────────────────────────────────────────────────────────────────────
// Statements
// ─────────────────────────────────────────────────────────────────────────────

/// One SQL statement with its positional parameters.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Statement {
    /// SQL text.
    pub sql: String,
    /// Positional parameters (`?1`, `?2`, ... or bare `?`).
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// A statement with no parameters.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a parameter.
    #[must_use]
    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rows
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded result row with name-based typed accessors.
///
/// Accessors return [`StoreError::CorruptRow`] on a missing column or a type
/// mismatch instead of panicking.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    /// Build a row from shared column names and its values.
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    /// Decode the current row of a `rusqlite` cursor.
    pub(crate) fn from_sqlite(columns: &Arc<[String]>, row: &rusqlite::Row<'_>) -> Result<Self> {
        let mut values = Vec::with_capacity(columns.len());
        for idx in 0..columns.len() {
            values.push(SqlValue::from_value_ref(row.get_ref(idx)?));
        }
        Ok(Self::new(Arc::clone(columns), values))
    }

    /// Column names in select order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Raw value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    fn require(&self, column: &str) -> Result<&SqlValue> {
        self.get(column)
            .ok_or_else(|| StoreError::corrupt(column, "column missing from result"))
    }

    /// Integer column.
    pub fn get_i64(&self, column: &str) -> Result<i64> {
        match self.require(column)? {
            SqlValue::Integer(i) => Ok(*i),
            other => Err(mismatch(column, "integer", other)),
        }
    }

    /// Real column (integers widen).
    #[allow(clippy::cast_precision_loss)]
    pub fn get_f64(&self, column: &str) -> Result<f64> {
        match self.require(column)? {
            SqlValue::Real(f) => Ok(*f),
            SqlValue::Integer(i) => Ok(*i as f64),
            other => Err(mismatch(column, "real", other)),
        }
    }

    /// Boolean column stored as `0`/`1`.
    pub fn get_bool(&self, column: &str) -> Result<bool> {
        match self.require(column)? {
            SqlValue::Integer(0) | SqlValue::Bool(false) => Ok(false),
            SqlValue::Integer(1) | SqlValue::Bool(true) => Ok(true),
            other => Err(mismatch(column, "boolean", other)),
        }
    }

    /// Non-null text column.
    pub fn get_str(&self, column: &str) -> Result<&str> {
        match self.require(column)? {
            SqlValue::Text(s) => Ok(s),
            other => Err(mismatch(column, "text", other)),
        }
    }

    /// Nullable text column.
    pub fn get_opt_str(&self, column: &str) -> Result<Option<&str>> {
        match self.require(column)? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(s) => Ok(Some(s)),
            other => Err(mismatch(column, "text or null", other)),
        }
    }

    /// Timestamp column.
    pub fn get_timestamp(&self, column: &str) -> Result<DateTime<Utc>> {
        match self.require(column)? {
            SqlValue::Timestamp(ts) => Ok(*ts),
            SqlValue::Text(s) => parse_timestamp(column, s),
            other => Err(mismatch(column, "timestamp", other)),
        }
    }
}

fn mismatch(column: &str, expected: &str, got: &SqlValue) -> StoreError {
    StoreError::corrupt(column, format!("expected {expected}, got {}", got.type_name()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
