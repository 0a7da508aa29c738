//! Version resolution: which migrations run, in which order, to reach a target

use crate::migration::catalog::Catalog;
use crate::migration::file::{Direction, MigrationFile};
use crate::migration::state_table::StateTable;
use crate::migration::MigrationError;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Where a migration run should take the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Exactly this version (0 reverts everything)
    Version(i64),
    /// The highest version with an Up file
    Latest,
    /// Every Up migration not yet recorded, including ones older than the current version
    AllUnapplied,
}

impl FromStr for Target {
    type Err = MigrationError;

    /// Parse a target from text
    ///
    /// - digits → [`Target::Version`]
    /// - `latest` → [`Target::Latest`]
    /// - `max`, `all`, `all-unapplied` → [`Target::AllUnapplied`]
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        match text {
            "" => Err(MigrationError::TargetAmbiguous),
            "latest" => Ok(Target::Latest),
            "max" | "all" | "all-unapplied" => Ok(Target::AllUnapplied),
            _ if text.bytes().all(|b| b.is_ascii_digit()) => text
                .parse()
                .map(Target::Version)
                .map_err(|_| MigrationError::InvalidTarget(text.to_string())),
            _ => Err(MigrationError::InvalidTarget(text.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Version(version) => write!(f, "{version}"),
            Target::Latest => f.write_str("latest"),
            Target::AllUnapplied => f.write_str("all-unapplied"),
        }
    }
}

/// How a plan was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Move from `current` to `target`
    Explicit { current: i64, target: i64 },
    /// Apply every unrecorded Up migration
    CatchUp,
}

/// Verify the stored checksum of an already-applied migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumCheck<'c> {
    pub file: &'c MigrationFile,
    /// Query returning the stored `md5` of the version
    pub sql: String,
}

/// One migration to run plus the bookkeeping statement that records it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStep<'c> {
    pub file: &'c MigrationFile,
    /// INSERT for Up steps, DELETE for Down steps
    pub bookkeeping_sql: String,
}

impl ResolvedStep<'_> {
    #[must_use]
    pub fn version(&self) -> i64 {
        self.file.version
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.file.direction
    }
}

/// Migration described for dry runs and reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub version: i64,
    pub direction: Direction,
    pub name: String,
    pub filename: String,
}

impl From<&ResolvedStep<'_>> for PlannedStep {
    fn from(step: &ResolvedStep<'_>) -> Self {
        Self {
            version: step.file.version,
            direction: step.file.direction,
            name: step.file.name.clone(),
            filename: step.file.filename.clone(),
        }
    }
}

/// Checks and steps of one run, borrowing descriptors from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan<'c> {
    pub direction: Direction,
    pub mode: PlanMode,
    /// Run before any step; every check must pass
    pub checks: Vec<ChecksumCheck<'c>>,
    /// In execution order
    pub steps: Vec<ResolvedStep<'c>>,
}

impl Plan<'_> {
    /// Whether the plan applies nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step versions in execution order
    #[must_use]
    pub fn versions(&self) -> Vec<i64> {
        self.steps.iter().map(ResolvedStep::version).collect()
    }

    #[must_use]
    pub fn planned_steps(&self) -> Vec<PlannedStep> {
        self.steps.iter().map(PlannedStep::from).collect()
    }
}

/// Resolve the plan moving the schema from `current` to `target`
///
/// Upgrading runs the Up files in `(current, target]` ascending, after verifying the checksum
/// of every Up file in `(0, current]` when the bookkeeping table stores checksums.
/// Downgrading runs the Down files in `(target, current]` descending, without checks.
#[must_use]
pub fn resolve<'c>(current: i64, target: i64, catalog: &'c Catalog, table: &StateTable) -> Plan<'c> {
    let mode = PlanMode::Explicit { current, target };

    if target >= current {
        let checks = if table.is_extended() {
            let mut applied: Vec<&MigrationFile> = catalog
                .iter()
                .filter(|f| f.is_up() && f.version > 0 && f.version <= current)
                .collect();
            applied.sort_by_key(|f| f.version);
            applied
                .into_iter()
                .map(|file| ChecksumCheck {
                    file,
                    sql: table.checksum_sql(file.version),
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut pending: Vec<&MigrationFile> = catalog
            .iter()
            .filter(|f| f.is_up() && f.version > current && f.version <= target)
            .collect();
        pending.sort_by_key(|f| f.version);

        Plan {
            direction: Direction::Up,
            mode,
            checks,
            steps: up_steps(pending, table),
        }
    } else {
        let mut reverting: Vec<&MigrationFile> = catalog
            .iter()
            .filter(|f| !f.is_up() && f.version > target && f.version <= current)
            .collect();
        reverting.sort_by_key(|f| std::cmp::Reverse(f.version));

        Plan {
            direction: Direction::Down,
            mode,
            checks: Vec::new(),
            steps: reverting
                .into_iter()
                .map(|file| ResolvedStep {
                    file,
                    bookkeeping_sql: table.record_reverted_sql(file.version),
                })
                .collect(),
        }
    }
}

/// Resolve the plan applying every Up file whose version is not in `applied`
///
/// Gaps are filled regardless of the highest applied version.
#[must_use]
pub fn resolve_unapplied<'c>(
    catalog: &'c Catalog,
    applied: &BTreeSet<i64>,
    table: &StateTable,
) -> Plan<'c> {
    let mut pending: Vec<&MigrationFile> = catalog
        .iter()
        .filter(|f| f.is_up() && !applied.contains(&f.version))
        .collect();
    pending.sort_by_key(|f| f.version);

    Plan {
        direction: Direction::Up,
        mode: PlanMode::CatchUp,
        checks: Vec::new(),
        steps: up_steps(pending, table),
    }
}

fn up_steps<'c>(files: Vec<&'c MigrationFile>, table: &StateTable) -> Vec<ResolvedStep<'c>> {
    files
        .into_iter()
        .map(|file| ResolvedStep {
            file,
            bookkeeping_sql: table.record_applied_sql(file),
        })
        .collect()
}
