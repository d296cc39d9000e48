//! Static checks over a migration directory. Nothing is executed.
//!
//! Errors (fail validation):
//! - filename not `NNN_description.sql`
//! - sequence not starting at 1, gaps, duplicates
//! - empty body
//! - unbalanced parentheses or unterminated quotes/comments
//! - destructive statements (`DROP`, `DELETE`, `TRUNCATE`, `REPLACE`,
//!   `ALTER ... DROP|RENAME`)
//! - `CREATE TABLE` without `IF NOT EXISTS`
//!
//! Warnings:
//! - `CREATE INDEX` without `IF NOT EXISTS`

use std::collections::BTreeMap;
use std::path::Path;

use keel_store::sql;
use serde::Serialize;

use crate::errors::Result;
use crate::script::{parse_filename, sql_file_names};

/// How serious a finding is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Fails validation.
    Error,
    /// Reported only.
    Warning,
}

/// One finding.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// File the finding is about.
    pub file: String,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
}

impl Problem {
    fn error(file: &str, message: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(file: &str, message: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

/// Outcome of [`validate_dir`].
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// Number of `.sql` files inspected.
    pub scripts: usize,
    /// Every finding, in file order.
    pub problems: Vec<Problem>,
}

impl ValidationReport {
    /// Whether no error-level finding was reported.
    pub fn is_valid(&self) -> bool {
        !self.problems.iter().any(|p| p.severity == Severity::Error)
    }

    /// Error-level findings.
    pub fn errors(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter().filter(|p| p.severity == Severity::Error)
    }

    /// Warning-level findings.
    pub fn warnings(&self) -> impl Iterator<Item = &Problem> {
        self.problems.iter().filter(|p| p.severity == Severity::Warning)
    }
}

/// Validate every `.sql` file in `dir`.
///
/// Only an unreadable directory or file is an `Err`; everything else is
/// reported in the [`ValidationReport`].
pub fn validate_dir(dir: &Path) -> Result<ValidationReport> {
    let mut report = ValidationReport::default();
    let mut versions: BTreeMap<u32, Vec<String>> = BTreeMap::new();

    for file_name in sql_file_names(dir)? {
        report.scripts += 1;
        match parse_filename(&file_name) {
            Some((version, _)) => versions.entry(version).or_default().push(file_name.clone()),
            None => report.problems.push(Problem::error(
                &file_name,
                "filename must match NNN_description.sql (lower-case description)",
            )),
        }
        let path = dir.join(&file_name);
        let body = std::fs::read_to_string(&path)
            .map_err(|e| crate::errors::MigrationError::io(&path, e))?;
        report.problems.extend(check_script(&file_name, &body));
    }

    report.problems.extend(check_sequence(&versions));
    Ok(report)
}

/// Contiguity: start at 1, no gaps, no duplicates.
fn check_sequence(versions: &BTreeMap<u32, Vec<String>>) -> Vec<Problem> {
    let mut problems = Vec::new();
    let mut expected = 1;
    for (&version, files) in versions {
        if files.len() > 1 {
            problems.push(Problem::error(
                &files[1],
                format!("duplicate version {version} (also in {})", files[0]),
            ));
        }
        if version != expected {
            problems.push(Problem::error(
                &files[0],
                if expected == 1 {
                    format!("sequence must start at 001, found {version:03}")
                } else {
                    format!("gap in sequence: expected {expected:03}, found {version:03}")
                },
            ));
        }
        expected = version + 1;
    }
    problems
}

/// Per-file checks on the script body.
pub fn check_script(file: &str, body: &str) -> Vec<Problem> {
    let mut problems = Vec::new();

    if let Err(message) = check_balance(body) {
        problems.push(Problem::error(file, message));
    }

    let statements = sql::split_statements(body);
    if statements.is_empty() {
        problems.push(Problem::error(file, "script has no statements"));
        return problems;
    }

    for statement in &statements {
        let head = first_line(statement);
        if let Some(reason) = sql::destructive_reason(statement) {
            problems.push(Problem::error(
                file,
                format!("destructive statement not allowed ({reason}): {head}"),
            ));
        }
        if sql::create_table_guarded(statement) == Some(false) {
            problems.push(Problem::error(
                file,
                format!("CREATE TABLE must use IF NOT EXISTS: {head}"),
            ));
        }
        if let Some(target) = sql::index_target(statement) {
            if !target.if_not_exists {
                problems.push(Problem::warning(
                    file,
                    format!(
                        "CREATE INDEX {} without IF NOT EXISTS; indexes are only allowed while {} is empty",
                        target.index, target.table
                    ),
                ));
            }
        }
    }
    problems
}

fn first_line(statement: &str) -> String {
    let line = statement.lines().next().unwrap_or_default().trim();
    if line.chars().count() > 60 {
        format!("{}...", line.chars().take(60).collect::<String>())
    } else {
        line.to_string()
    }
}

/// Parentheses balance and quote/comment termination, outside strings.
fn check_balance(body: &str) -> std::result::Result<(), String> {
    let mut depth: i64 = 0;
    let mut quote: Option<char> = None;
    let mut line_comment = false;
    let mut block_comment = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if line_comment {
            line_comment = c != '\n';
            continue;
        }
        if block_comment {
            if c == '*' && chars.peek() == Some(&'/') {
                let _ = chars.next();
                block_comment = false;
            }
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' | '`' => quote = Some(c),
            '-' if chars.peek() == Some(&'-') => line_comment = true,
            '/' if chars.peek() == Some(&'*') => {
                let _ = chars.next();
                block_comment = true;
            }
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth < 0 {
                    return Err("unbalanced parentheses: unexpected ')'".into());
                }
            }
            _ => {}
        }
    }

    if let Some(q) = quote {
        return Err(format!("unterminated {q} quote"));
    }
    if block_comment {
        return Err("unterminated block comment".into());
    }
    if depth != 0 {
        return Err(format!("unbalanced parentheses: {depth} unclosed '('"));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
