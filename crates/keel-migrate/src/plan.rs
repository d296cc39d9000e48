//! Disk-versus-ledger diff.

use std::collections::BTreeMap;
use std::iter::FusedIterator;

use serde::Serialize;

use crate::ledger::MigrationRecord;
use crate::script::MigrationScript;

/// An applied script whose on-disk body no longer matches the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftWarning {
    /// Script version.
    pub version: u32,
    /// Script name on disk.
    pub name: String,
    /// Checksum recorded when it was applied.
    pub recorded: String,
    /// Checksum of the file today.
    pub on_disk: String,
}

/// Scripts not yet applied, in ascending version order.
///
/// Consumed once; diff again to get a fresh sequence.
#[derive(Debug)]
pub struct PendingMigrations {
    scripts: std::vec::IntoIter<MigrationScript>,
    applied: BTreeMap<u32, MigrationRecord>,
}

impl PendingMigrations {
    /// Highest successfully applied version, if any.
    pub fn latest_applied(&self) -> Option<u32> {
        self.applied.keys().next_back().copied()
    }
}

impl Iterator for PendingMigrations {
    type Item = MigrationScript;

    fn next(&mut self) -> Option<MigrationScript> {
        self.scripts
            .by_ref()
            .find(|script| !self.applied.contains_key(&script.version))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.scripts.size_hint().1)
    }
}

impl FusedIterator for PendingMigrations {}

/// Result of diffing on-disk scripts against the ledger.
#[derive(Debug)]
pub struct Plan {
    /// Scripts still to run.
    pub pending: PendingMigrations,
    /// Applied scripts whose checksum changed.
    pub drift: Vec<DriftWarning>,
    /// Versions applied in the ledger but absent on disk.
    pub missing_on_disk: Vec<u32>,
    /// Number of scripts on disk.
    pub total: usize,
    /// Number of on-disk scripts already applied.
    pub applied: usize,
}

/// Diff `scripts` (ordered by version) against the successful ledger rows.
pub fn diff(scripts: Vec<MigrationScript>, applied: BTreeMap<u32, MigrationRecord>) -> Plan {
    let mut drift = Vec::new();
    let mut applied_on_disk = 0;
    for script in &scripts {
        if let Some(record) = applied.get(&script.version) {
            applied_on_disk += 1;
            if record.checksum != script.checksum {
                drift.push(DriftWarning {
                    version: script.version,
                    name: script.name.clone(),
                    recorded: record.checksum.clone(),
                    on_disk: script.checksum.clone(),
                });
            }
        }
    }
    let missing_on_disk = applied
        .keys()
        .copied()
        .filter(|v| !scripts.iter().any(|s| s.version == *v))
        .collect();

    Plan {
        total: scripts.len(),
        applied: applied_on_disk,
        drift,
        missing_on_disk,
        pending: PendingMigrations {
            scripts: scripts.into_iter(),
            applied,
        },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
