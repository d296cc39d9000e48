//! Lightweight SQL text utilities.
//!
//! Not a parser: just enough lexing to split scripts on statement
//! boundaries (respecting quotes and comments), strip comments, and
//! recognize the handful of statement shapes the append-only rules care
//! about.

use std::sync::LazyLock;

use regex::Regex;

/// A `CREATE [UNIQUE] INDEX ... ON <table>` found in a statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexTarget {
    /// Index name.
    pub index: String,
    /// Indexed table.
    pub table: String,
    /// Whether the statement carries `IF NOT EXISTS`.
    pub if_not_exists: bool,
}

static CREATE_INDEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)^CREATE\s+(?:UNIQUE\s+)?INDEX\s+(IF\s+NOT\s+EXISTS\s+)?["`]?([A-Za-z_][A-Za-z0-9_]*)["`]?\s+ON\s+["`]?([A-Za-z_][A-Za-z0-9_]*)"#,
    )
    .unwrap()
});

static CREATE_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^CREATE\s+(?:TEMP(?:ORARY)?\s+)?TABLE\s+(IF\s+NOT\s+EXISTS\s+)?")
        .unwrap()
});

static ALTER_DESTRUCTIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^ALTER\s+TABLE\s+["`]?[A-Za-z_][A-Za-z0-9_]*["`]?\s+(DROP|RENAME)\b"#)
        .unwrap()
});

static REPLACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:REPLACE\s+INTO|INSERT\s+OR\s+REPLACE)\b")
        .unwrap()
});

#[derive(Clone, Copy, PartialEq, Eq)]
enum Lex {
    Code,
    Single,
    Double,
    Backtick,
    LineComment,
    BlockComment,
}

/// Split a script into statements on top-level `;`.
///
/// Quotes and comments are respected; comments are removed and each
/// statement is trimmed. Empty statements are dropped.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut state = Lex::Code;
    let mut chars = script.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            Lex::Code => match c {
                ';' => {
                    push_trimmed(&mut out, &current);
                    current.clear();
                }
                '\'' => {
                    state = Lex::Single;
                    current.push(c);
                }
                '"' => {
                    state = Lex::Double;
                    current.push(c);
                }
                '`' => {
                    state = Lex::Backtick;
                    current.push(c);
                }
                '-' if chars.peek() == Some(&'-') => {
                    let _ = chars.next();
                    state = Lex::LineComment;
                }
                '/' if chars.peek() == Some(&'*') => {
                    let _ = chars.next();
                    state = Lex::BlockComment;
                    current.push(' ');
                }
                _ => current.push(c),
            },
            Lex::Single | Lex::Double | Lex::Backtick => {
                current.push(c);
                let close = match state {
                    Lex::Single => '\'',
                    Lex::Double => '"',
                    _ => '`',
                };
                if c == close {
                    state = Lex::Code;
                }
            }
            Lex::LineComment => {
                if c == '\n' {
                    state = Lex::Code;
                    current.push('\n');
                }
            }
            Lex::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    let _ = chars.next();
                    state = Lex::Code;
                }
            }
        }
    }
    push_trimmed(&mut out, &current);
    out
}

fn push_trimmed(out: &mut Vec<String>, statement: &str) {
    let trimmed = statement.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Collapse whitespace runs to single spaces.
pub fn normalize(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Upper-cased first keyword of a statement.
pub fn leading_keyword(statement: &str) -> String {
    statement
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase()
}

/// Parse an index creation statement.
pub fn index_target(statement: &str) -> Option<IndexTarget> {
    let normalized = normalize(statement);
    CREATE_INDEX.captures(&normalized).map(|caps| IndexTarget {
        if_not_exists: caps.get(1).is_some(),
        index: caps[2].to_string(),
        table: caps[3].to_string(),
    })
}

/// All index creations in a script.
pub fn index_targets(script: &str) -> Vec<IndexTarget> {
    split_statements(script)
        .iter()
        .filter_map(|s| index_target(s))
        .collect()
}

/// `Some(guarded)` for a `CREATE TABLE` statement, `None` otherwise.
pub fn create_table_guarded(statement: &str) -> Option<bool> {
    CREATE_TABLE
        .captures(&normalize(statement))
        .map(|caps| caps.get(1).is_some())
}

/// Describe why a statement would rewrite or remove history, if it would.
pub fn destructive_reason(statement: &str) -> Option<&'static str> {
    let normalized = normalize(statement);
    match leading_keyword(&normalized).as_str() {
        "DELETE" => return Some("DELETE removes rows"),
        "DROP" => return Some("DROP removes schema objects"),
        "TRUNCATE" => return Some("TRUNCATE removes rows"),
        _ => {}
    }
    if REPLACE.is_match(&normalized) {
        return Some("REPLACE overwrites rows");
    }
    if ALTER_DESTRUCTIVE.is_match(&normalized) {
        return Some("ALTER TABLE ... DROP/RENAME rewrites schema");
    }
    None
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
