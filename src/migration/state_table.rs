//! Bookkeeping table management
//!
//! The bookkeeping table (default `schemaversion`) holds one row per applied Up migration.
//! Dialects that support checksum verification use the extended shape:
//!
//! ```sql
//! CREATE TABLE schemaversion (
//!     version BIGINT PRIMARY KEY,
//!     name TEXT DEFAULT '',
//!     md5 TEXT DEFAULT '',
//!     run_at TIMESTAMPTZ DEFAULT now()
//! )
//! ```
//!
//! Other dialects store only `version`.

use crate::dialect::{Dialect, EXTENDED_COLUMNS};
use crate::gateway::Connection;
use crate::migration::file::MigrationFile;
use crate::migration::record::{parse_version, SchemaRecord};
use crate::migration::MigrationError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Default bookkeeping table name
pub const DEFAULT_TABLE: &str = "schemaversion";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Quote a value as a SQL string literal
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// The bookkeeping table and the statements that read and write it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTable {
    name: String,
    extended: bool,
}

impl StateTable {
    /// Bookkeeping table in the shape `dialect` uses
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::InvalidTableName`] unless `name` is a plain SQL identifier.
    pub fn new(name: &str, dialect: &dyn Dialect) -> Result<Self, MigrationError> {
        Self::with_shape(name, dialect.supports_checksum_column())
    }

    /// Bookkeeping table with an explicit shape
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::InvalidTableName`] unless `name` is a plain SQL identifier.
    pub fn with_shape(name: &str, extended: bool) -> Result<Self, MigrationError> {
        if !IDENTIFIER.is_match(name) {
            return Err(MigrationError::InvalidTableName(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            extended,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether rows carry `name`, `md5` and `run_at`
    #[must_use]
    pub fn is_extended(&self) -> bool {
        self.extended
    }

    /// Recorded versions, ascending
    #[must_use]
    pub fn applied_versions_sql(&self) -> String {
        format!("SELECT version FROM {} ORDER BY version", self.name)
    }

    /// All recorded rows, ascending by version
    #[must_use]
    pub fn records_sql(&self) -> String {
        if self.extended {
            format!(
                "SELECT version, name, md5, run_at FROM {} ORDER BY version",
                self.name
            )
        } else {
            self.applied_versions_sql()
        }
    }

    /// Stored checksum of one version
    #[must_use]
    pub fn checksum_sql(&self, version: i64) -> String {
        format!("SELECT md5 FROM {} WHERE version = {version}", self.name)
    }

    /// Statement recording that `file` was applied
    #[must_use]
    pub fn record_applied_sql(&self, file: &MigrationFile) -> String {
        if self.extended {
            format!(
                "INSERT INTO {} (version, name, md5) VALUES ({}, {}, {})",
                self.name,
                file.version,
                quote_literal(&file.name),
                quote_literal(file.checksum.as_deref().unwrap_or_default()),
            )
        } else {
            format!("INSERT INTO {} (version) VALUES ({})", self.name, file.version)
        }
    }

    /// Statement removing the row of a reverted version
    #[must_use]
    pub fn record_reverted_sql(&self, version: i64) -> String {
        format!("DELETE FROM {} WHERE version = {version}", self.name)
    }

    /// Create the table if it is missing, or upgrade an existing one to the extended shape
    ///
    /// Idempotent. Returns `true` when the table was created.
    ///
    /// # Errors
    ///
    /// Returns the first failing statement's error.
    pub fn ensure(&self, connection: &mut Connection) -> Result<bool, MigrationError> {
        let exists_sql = connection.dialect().table_exists_sql(&self.name);
        if connection.query(&exists_sql)?.is_empty() {
            let create_sql = connection.dialect().create_table_sql(&self.name);
            connection.query(&create_sql)?;
            log::info!("created bookkeeping table {}", self.name);
            return Ok(true);
        }

        if self.extended {
            for column in EXTENDED_COLUMNS {
                let column_sql = connection.dialect().column_exists_sql(&self.name, column);
                if !connection.query(&column_sql)?.is_empty() {
                    continue;
                }
                if let Some(add_sql) = connection.dialect().add_column_sql(&self.name, column) {
                    connection.query(&add_sql)?;
                    log::info!("added column {column} to bookkeeping table {}", self.name);
                }
            }
        }
        Ok(false)
    }

    /// Highest recorded version, or 0 when no migration has been applied
    ///
    /// # Errors
    ///
    /// Returns the query error; a failing query is never reported as version 0.
    pub fn current_version(&self, connection: &mut Connection) -> Result<i64, MigrationError> {
        let sql = connection.dialect().current_version_sql(&self.name);
        let rows = connection.query(&sql)?;
        let value = rows.first().and_then(|row| row.get_index(0));
        Ok(parse_version(value)?.unwrap_or(0))
    }

    /// Distinct recorded versions, excluding the reserved version 0
    ///
    /// # Errors
    ///
    /// Returns the query error, or `CorruptState` for a non-integer version.
    pub fn applied_versions(
        &self,
        connection: &mut Connection,
    ) -> Result<BTreeSet<i64>, MigrationError> {
        let rows = connection.query(&self.applied_versions_sql())?;
        let mut versions = BTreeSet::new();
        for row in &rows {
            if let Some(version) = parse_version(row.get("version"))? {
                if version != 0 {
                    versions.insert(version);
                }
            }
        }
        Ok(versions)
    }

    /// All recorded rows, ascending by version, excluding version 0
    ///
    /// # Errors
    ///
    /// Returns the query error, or `CorruptState` for unparseable values.
    pub fn records(&self, connection: &mut Connection) -> Result<Vec<SchemaRecord>, MigrationError> {
        let rows = connection.query(&self.records_sql())?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let record = SchemaRecord::from_row(row)?;
            if record.version != 0 {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Checksum recorded for `version`
    ///
    /// `None` when there is no row or the row's checksum is `NULL`.
    ///
    /// # Errors
    ///
    /// Returns the query error.
    pub fn stored_checksum(
        &self,
        connection: &mut Connection,
        version: i64,
    ) -> Result<Option<String>, MigrationError> {
        let rows = connection.query(&self.checksum_sql(version))?;
        Ok(rows
            .first()
            .and_then(|row| row.get("md5"))
            .map(str::to_string))
    }
}
