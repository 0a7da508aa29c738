//! Migration-specific error types

use crate::gateway::GatewayError;
use crate::migration::file::Direction;
use crate::migration::runner::AppliedMigration;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Longest statement prefix quoted in error messages
const STATEMENT_PREVIEW_LEN: usize = 120;

/// Migration-specific errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Migration directory or file could not be read
    #[error("Failed to read migration source {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A `.sql` file does not follow `<version>.<up|down>[.<name>].sql`
    #[error("Malformed migration file name '{filename}': {reason}")]
    MalformedFilename { filename: String, reason: String },

    /// Two files claim the same version and direction
    #[error("Duplicate {direction} migration for version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: i64,
        direction: Direction,
        first: String,
        second: String,
    },

    /// Database could not be reached
    #[error("Database connection failed: {0}")]
    Connection(#[source] GatewayError),

    /// One of the engine's own statements failed
    #[error("Query failed ({statement}): {source}")]
    Query {
        statement: String,
        #[source]
        source: GatewayError,
    },

    /// The SQL of a migration failed; nothing was recorded for it
    #[error("Migration {version} ({filename}) failed: {source}")]
    MigrationFailed {
        version: i64,
        filename: String,
        #[source]
        source: GatewayError,
    },

    /// The migration ran but its bookkeeping row could not be written or removed
    #[error(
        "Migration {version} ({filename}) was applied {direction} but the bookkeeping table \
         could not be updated: {source}\n\
         The schema change is committed; reconcile the bookkeeping table manually."
    )]
    BookkeepingInconsistency {
        version: i64,
        filename: String,
        direction: Direction,
        #[source]
        source: GatewayError,
    },

    /// An applied migration file changed after it was applied
    #[error(
        "Migration {version} ({filename}) has been modified after being applied.\n\
         Expected checksum: {expected}\n\
         Actual checksum: {actual}"
    )]
    ChecksumMismatch {
        version: i64,
        filename: String,
        /// Checksum recorded when the migration was applied
        expected: String,
        /// Checksum of the file as it is now
        actual: String,
    },

    /// No target was given and catch-up mode was not requested
    #[error("No target version specified; pass a version, 'latest' or 'max'")]
    TargetAmbiguous,

    /// Target text could not be interpreted
    #[error("Invalid migration target '{0}'")]
    InvalidTarget(String),

    /// Bookkeeping table name is not a plain SQL identifier
    #[error("Invalid bookkeeping table name '{0}'")]
    InvalidTableName(String),

    /// A bookkeeping value could not be interpreted
    #[error("Unexpected value in bookkeeping table: {0}")]
    CorruptState(String),
}

impl MigrationError {
    /// Map a gateway failure of an engine statement
    pub(crate) fn from_gateway(statement: &str, error: GatewayError) -> Self {
        if error.is_connection() {
            MigrationError::Connection(error)
        } else {
            MigrationError::Query {
                statement: preview(statement),
                source: error,
            }
        }
    }
}

fn preview(statement: &str) -> String {
    let statement = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    match statement.char_indices().nth(STATEMENT_PREVIEW_LEN) {
        Some((index, _)) => format!("{}...", &statement[..index]),
        None => statement,
    }
}

/// A run that stopped early
///
/// Carries the migrations that were applied before the failure so operators know exactly how
/// far the schema advanced. Applied steps are committed; nothing is rolled back.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct MigrationFailure {
    /// Steps that completed, in execution order
    pub completed: Vec<AppliedMigration>,
    /// What stopped the run
    pub error: MigrationError,
}

impl MigrationFailure {
    pub fn new(completed: Vec<AppliedMigration>, error: MigrationError) -> Self {
        Self { completed, error }
    }
}

impl From<MigrationError> for MigrationFailure {
    fn from(error: MigrationError) -> Self {
        Self::new(Vec::new(), error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_preview_collapses_whitespace() {
        assert_eq!(preview("SELECT\n   1\tFROM  x"), "SELECT 1 FROM x");
    }

    #[test]
    fn test_statement_preview_truncates() {
        let long = "x".repeat(STATEMENT_PREVIEW_LEN + 10);
        let shown = preview(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.len(), STATEMENT_PREVIEW_LEN + 3);
    }

    #[test]
    fn test_from_gateway_distinguishes_connection_errors() {
        let err = MigrationError::from_gateway("SELECT 1", GatewayError::connect("refused"));
        assert!(matches!(err, MigrationError::Connection(_)));

        let err = MigrationError::from_gateway("SELECT 1", GatewayError::query("syntax"));
        assert!(matches!(err, MigrationError::Query { .. }));
    }

    #[test]
    fn test_checksum_mismatch_message_names_both_checksums() {
        let err = MigrationError::ChecksumMismatch {
            version: 2,
            filename: "002.up.sql".to_string(),
            expected: "aaa".to_string(),
            actual: "bbb".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("Migration 2 (002.up.sql)"));
        assert!(message.contains("Expected checksum: aaa"));
        assert!(message.contains("Actual checksum: bbb"));
    }

    #[test]
    fn test_failure_displays_inner_error() {
        let failure = MigrationFailure::from(MigrationError::TargetAmbiguous);
        assert!(failure.completed.is_empty());
        assert_eq!(failure.to_string(), MigrationError::TargetAmbiguous.to_string());
    }
}
