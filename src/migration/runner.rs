//! Plan execution
//!
//! Runs a resolved [`Plan`] one statement at a time: checksum checks first, then each step
//! followed by its bookkeeping statement. The first failure stops the run; steps that
//! completed before it stay applied and are reported in the [`MigrationFailure`].

use crate::gateway::Connection;
use crate::migration::checksum::{checksum_matches, file_checksum, NewlinePolicy};
use crate::migration::file::Direction;
use crate::migration::resolver::{ChecksumCheck, Plan, ResolvedStep};
use crate::migration::source::MigrationSource;
use crate::migration::{MigrationError, MigrationFailure};
use log::Level;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Settings that affect how a plan runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Line-ending normalization; must match the one used to build the catalog
    pub newline: Option<NewlinePolicy>,
    /// Log each step at `info` instead of `debug`
    pub log_progress: bool,
}

impl RunOptions {
    fn progress_level(&self) -> Level {
        if self.log_progress {
            Level::Info
        } else {
            Level::Debug
        }
    }
}

/// A migration that ran and was recorded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedMigration {
    pub version: i64,
    pub direction: Direction,
    pub name: String,
    pub filename: String,
    /// Body and bookkeeping statement together
    pub duration: Duration,
}

/// Execute `plan` against `connection`, reading migration SQL from `source`
///
/// # Errors
///
/// Returns a [`MigrationFailure`] carrying the steps applied before the error:
/// - `ChecksumMismatch` when an applied migration was modified (no step runs)
/// - `SourceUnreadable` when a migration file cannot be read as UTF-8 text
/// - `MigrationFailed` when a migration body fails
/// - `BookkeepingInconsistency` when the body ran but the bookkeeping statement failed
/// - `Connection` / `Query` when the database is lost during checks or before a body runs
pub fn execute(
    plan: &Plan<'_>,
    connection: &mut Connection,
    source: &dyn MigrationSource,
    options: &RunOptions,
) -> Result<Vec<AppliedMigration>, MigrationFailure> {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!(
        "migration_plan",
        direction = %plan.direction,
        checks = plan.checks.len(),
        steps = plan.steps.len()
    )
    .entered();

    verify_checks(plan, connection, source, options)?;

    let mut completed = Vec::with_capacity(plan.steps.len());
    for step in &plan.steps {
        match run_step(step, connection, source, options) {
            Ok(applied) => completed.push(applied),
            Err(error) => {
                log::error!(
                    "migration stopped after {} of {} steps: {error}",
                    completed.len(),
                    plan.steps.len()
                );
                return Err(MigrationFailure::new(completed, error));
            }
        }
    }
    Ok(completed)
}

/// Run the checksum checks of `plan` without running any step
///
/// Returns the number of migrations whose recorded checksum was compared; rows without a
/// recorded checksum are skipped and not counted.
///
/// # Errors
///
/// Returns `ChecksumMismatch` for the first modified migration, or the query error.
pub fn verify_checks(
    plan: &Plan<'_>,
    connection: &mut Connection,
    source: &dyn MigrationSource,
    options: &RunOptions,
) -> Result<usize, MigrationError> {
    let mut compared = 0;
    for check in &plan.checks {
        if verify(check, connection, source, options)? {
            compared += 1;
        }
    }
    if compared > 0 {
        log::debug!("verified checksums of {compared} applied migrations");
    }
    Ok(compared)
}

/// `Ok(false)` when there was no recorded checksum to compare
fn verify(
    check: &ChecksumCheck<'_>,
    connection: &mut Connection,
    source: &dyn MigrationSource,
    options: &RunOptions,
) -> Result<bool, MigrationError> {
    let file = check.file;
    let rows = connection.query(&check.sql)?;
    let stored = match rows.first().and_then(|row| row.get("md5")) {
        Some(stored) if !stored.is_empty() => stored.to_string(),
        _ => {
            log::debug!("no recorded checksum for version {}, skipping", file.version);
            return Ok(false);
        }
    };

    let actual = match &file.checksum {
        Some(checksum) => checksum.clone(),
        None => file_checksum(source, &file.path, options.newline)?,
    };

    if checksum_matches(&stored, &actual) {
        return Ok(true);
    }

    #[cfg(feature = "metrics")]
    crate::metrics::METRICS.record_checksum_mismatch();

    Err(MigrationError::ChecksumMismatch {
        version: file.version,
        filename: file.filename.clone(),
        expected: stored,
        actual,
    })
}

fn run_step(
    step: &ResolvedStep<'_>,
    connection: &mut Connection,
    source: &dyn MigrationSource,
    options: &RunOptions,
) -> Result<AppliedMigration, MigrationError> {
    let file = step.file;

    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!(
        "migration_step",
        version = file.version,
        direction = %file.direction,
        name = %file.name
    )
    .entered();

    let started = Instant::now();
    let result = apply(step, connection, source);
    let duration = started.elapsed();

    #[cfg(feature = "metrics")]
    crate::metrics::METRICS.record_step(
        file.direction.as_str(),
        if result.is_ok() { "applied" } else { "failed" },
        duration,
    );

    result?;

    log::log!(
        options.progress_level(),
        "{} migration {} ({}) in {:?}",
        match file.direction {
            Direction::Up => "applied",
            Direction::Down => "reverted",
        },
        file.version,
        file.filename,
        duration
    );

    Ok(AppliedMigration {
        version: file.version,
        direction: file.direction,
        name: file.name.clone(),
        filename: file.filename.clone(),
        duration,
    })
}

fn apply(
    step: &ResolvedStep<'_>,
    connection: &mut Connection,
    source: &dyn MigrationSource,
) -> Result<(), MigrationError> {
    let file = step.file;
    let sql = source
        .read_to_string(&file.path)
        .map_err(|e| MigrationError::SourceUnreadable {
            path: file.path.clone(),
            source: e,
        })?;

    log::debug!("running {}", file.filename);
    connection.execute(&sql).map_err(|e| {
        if e.is_connection() {
            MigrationError::Connection(e)
        } else {
            MigrationError::MigrationFailed {
                version: file.version,
                filename: file.filename.clone(),
                source: e,
            }
        }
    })?;

    connection
        .execute(&step.bookkeeping_sql)
        .map_err(|e| MigrationError::BookkeepingInconsistency {
            version: file.version,
            filename: file.filename.clone(),
            direction: file.direction,
            source: e,
        })?;
    Ok(())
}
