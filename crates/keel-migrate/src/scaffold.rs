//! `create`: allocate the next sequence number and write a skeleton.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use crate::errors::{MigrationError, Result};
use crate::script::{parse_filename, sql_file_names};

/// Lower-case `raw`, turn every run of non-alphanumerics into one `_`, and
/// trim underscores from both ends.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Next free sequence number in `dir` (1 for an empty or missing directory).
pub fn next_version(dir: &Path) -> Result<u32> {
    if !dir.exists() {
        return Ok(1);
    }
    let latest = sql_file_names(dir)?
        .iter()
        .filter_map(|name| parse_filename(name))
        .map(|(version, _)| version)
        .max()
        .unwrap_or(0);
    Ok(latest + 1)
}

fn template(file_stem: &str) -> String {
    format!(
        "-- Migration: {file_stem}\n\
         -- Created: {created}\n\
         --\n\
         -- The store is append-only:\n\
         --   * use CREATE TABLE IF NOT EXISTS\n\
         --   * add columns with ALTER TABLE ... ADD COLUMN (never DROP or RENAME)\n\
         --   * create indexes only while the table is still empty\n\
         --   * no DELETE, DROP, TRUNCATE, or REPLACE\n\
         \n",
        created = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

/// Write `NNN_<sanitized name>.sql` into `dir` and return its path.
///
/// Creates `dir` if needed. Never overwrites an existing file.
pub fn create_migration(dir: &Path, name: &str) -> Result<PathBuf> {
    let slug = sanitize_name(name);
    if slug.is_empty() {
        return Err(MigrationError::InvalidName(name.to_string()));
    }
    std::fs::create_dir_all(dir).map_err(|e| MigrationError::io(dir, e))?;

    let version = next_version(dir)?;
    let stem = format!("{version:03}_{slug}");
    let path = dir.join(format!("{stem}.sql"));
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| MigrationError::io(&path, e))?;
    file.write_all(template(&stem).as_bytes())
        .map_err(|e| MigrationError::io(&path, e))?;

    info!(version, path = %path.display(), "created migration");
    Ok(path)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
