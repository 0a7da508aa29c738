//! Migration status tracking

use crate::migration::catalog::Catalog;
use crate::migration::checksum::checksum_matches;
use crate::migration::SchemaRecord;
use serde::Serialize;
use std::collections::BTreeSet;

/// Migration status information
#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    /// Highest recorded version (0 when nothing is applied)
    pub current_version: i64,

    /// Highest version with an Up file
    pub max_available: Option<i64>,

    /// Applied migrations (from the bookkeeping table)
    pub applied: Vec<SchemaRecord>,

    /// Pending migrations (Up files without a bookkeeping row), ascending
    pub pending: Vec<PendingMigration>,

    /// Applied versions whose Up file is no longer in the source
    pub missing: Vec<i64>,

    /// Applied versions whose Up file changed since it was applied
    pub modified: Vec<i64>,

    /// Number of applied migrations
    pub applied_count: usize,

    /// Number of pending migrations
    pub pending_count: usize,
}

/// Represents a pending migration (not yet applied)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingMigration {
    pub version: i64,
    pub name: String,
    pub filename: String,
    pub checksum: Option<String>,
}

impl MigrationStatus {
    /// Compare the catalog with the recorded rows
    #[must_use]
    pub fn new(current_version: i64, catalog: &Catalog, applied: Vec<SchemaRecord>) -> Self {
        let applied_versions: BTreeSet<i64> = applied.iter().map(|r| r.version).collect();
        let up_versions = catalog.up_versions();

        let pending: Vec<PendingMigration> = up_versions
            .difference(&applied_versions)
            .filter_map(|v| catalog.up(*v))
            .map(|file| PendingMigration {
                version: file.version,
                name: file.name.clone(),
                filename: file.filename.clone(),
                checksum: file.checksum.clone(),
            })
            .collect();

        let missing = applied_versions
            .difference(&up_versions)
            .copied()
            .collect();

        let modified = applied
            .iter()
            .filter(|record| {
                let stored = record.checksum.as_deref().unwrap_or_default();
                let current = catalog.up(record.version).and_then(|f| f.checksum.as_deref());
                current.is_some_and(|current| !checksum_matches(stored, current))
            })
            .map(|record| record.version)
            .collect();

        Self {
            current_version,
            max_available: catalog.max_up_version(),
            applied_count: applied.len(),
            pending_count: pending.len(),
            applied,
            pending,
            missing,
            modified,
        }
    }

    /// Total number of migrations (applied + pending)
    #[must_use]
    pub fn total(&self) -> usize {
        self.applied_count + self.pending_count
    }

    /// Check if all migrations are applied
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.pending_count == 0
    }

    /// Get the latest applied migration version
    #[must_use]
    pub fn latest_applied_version(&self) -> Option<i64> {
        self.applied.iter().map(|m| m.version).max()
    }

    /// Get the next pending migration version
    #[must_use]
    pub fn next_pending_version(&self) -> Option<i64> {
        self.pending.first().map(|m| m.version)
    }
}
