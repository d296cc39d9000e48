//! On-disk migration scripts.
//!
//! Scripts live in one flat directory and are named `NNN_description.sql`:
//! a zero-padded sequence number (at least three digits) and a lower-case
//! description. Files without the `.sql` extension are ignored.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use crate::errors::{MigrationError, Result};

static FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{3,})_([a-z0-9][a-z0-9_]*)\.sql$").unwrap());

/// One script read from disk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MigrationScript {
    /// Sequence number.
    pub version: u32,
    /// Description from the filename.
    pub name: String,
    /// Full path.
    pub path: PathBuf,
    /// Script body.
    pub sql: String,
    /// SHA-256 of the body, lower-case hex.
    pub checksum: String,
}

impl fmt::Display for MigrationScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}_{}", self.version, self.name)
    }
}

/// Split `NNN_description.sql` into version and description.
pub fn parse_filename(file_name: &str) -> Option<(u32, String)> {
    let caps = FILENAME.captures(file_name)?;
    let version = caps[1].parse().ok()?;
    Some((version, caps[2].to_string()))
}

/// SHA-256 of a script body as lower-case hex.
pub fn checksum_hex(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// File names of every `.sql` file in `dir`, sorted.
pub fn sql_file_names(dir: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(dir).map_err(|e| MigrationError::io(dir, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| MigrationError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "sql") {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// Read every script in `dir`, ordered by version.
///
/// Strict: a badly named `.sql` file or a duplicated version is an error.
pub fn discover(dir: &Path) -> Result<Vec<MigrationScript>> {
    let mut scripts: Vec<MigrationScript> = Vec::new();
    for file_name in sql_file_names(dir)? {
        let Some((version, name)) = parse_filename(&file_name) else {
            return Err(MigrationError::InvalidFilename(file_name));
        };
        let path = dir.join(&file_name);
        let sql = std::fs::read_to_string(&path).map_err(|e| MigrationError::io(&path, e))?;
        scripts.push(MigrationScript {
            version,
            name,
            checksum: checksum_hex(&sql),
            path,
            sql,
        });
    }
    scripts.sort_by_key(|s| s.version);

    for pair in scripts.windows(2) {
        if pair[0].version == pair[1].version {
            return Err(MigrationError::DuplicateVersion {
                version: pair[0].version,
                first: file_name_of(&pair[0].path),
                second: file_name_of(&pair[1].path),
            });
        }
    }
    Ok(scripts)
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
