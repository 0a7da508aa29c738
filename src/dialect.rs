//! SQL dialects for the bookkeeping table
//!
//! A [`Dialect`] describes what the migration engine needs to know about a database engine:
//! how to check for and create the bookkeeping table, and whether that table carries the
//! extended shape (`name`, `md5`, `run_at`) that enables checksum verification.
//!
//! New engines opt into checksum verification by returning `true` from
//! [`Dialect::supports_checksum_column`]; nothing in the resolver or runner matches on
//! dialect names.

use std::fmt;

/// Columns added by the extended bookkeeping shape, in table order.
pub const EXTENDED_COLUMNS: [&str; 3] = ["name", "md5", "run_at"];

/// Capabilities and DDL of one database engine
pub trait Dialect: fmt::Debug + Send + Sync {
    /// Short engine name used in log output
    fn name(&self) -> &'static str;

    /// Whether the bookkeeping table stores `name` and `md5` alongside `version`
    fn supports_checksum_column(&self) -> bool {
        false
    }

    /// Query returning at least one row when `table` exists
    fn table_exists_sql(&self, table: &str) -> String;

    /// DDL creating the bookkeeping table in this dialect's shape
    fn create_table_sql(&self, table: &str) -> String;

    /// Query returning at least one row when `table` has `column`
    fn column_exists_sql(&self, table: &str, column: &str) -> String {
        format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_name = '{table}' AND column_name = '{column}'"
        )
    }

    /// DDL adding one of the [`EXTENDED_COLUMNS`] to an existing table
    ///
    /// Returns `None` for dialects without the extended shape or for unknown columns.
    fn add_column_sql(&self, _table: &str, _column: &str) -> Option<String> {
        None
    }

    /// Query returning the highest recorded version in a column named `version`
    ///
    /// The single returned row holds `NULL` when the table is empty.
    fn current_version_sql(&self, table: &str) -> String {
        format!("SELECT MAX(version) AS version FROM {table}")
    }
}

/// PostgreSQL: extended bookkeeping shape with checksum verification
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn supports_checksum_column(&self) -> bool {
        true
    }

    fn table_exists_sql(&self, table: &str) -> String {
        // Unquoted identifiers are folded to lower case by PostgreSQL
        format!(
            "SELECT tablename FROM pg_catalog.pg_tables \
             WHERE schemaname = CURRENT_SCHEMA AND tablename = '{}'",
            table.to_lowercase()
        )
    }

    fn create_table_sql(&self, table: &str) -> String {
        format!(
            "CREATE TABLE {table} (version BIGINT PRIMARY KEY, name TEXT DEFAULT '', \
             md5 TEXT DEFAULT '', run_at TIMESTAMPTZ DEFAULT now())"
        )
    }

    fn column_exists_sql(&self, table: &str, column: &str) -> String {
        format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = CURRENT_SCHEMA AND table_name = '{}' AND column_name = '{column}'",
            table.to_lowercase()
        )
    }

    fn add_column_sql(&self, table: &str, column: &str) -> Option<String> {
        let definition = match column {
            "name" | "md5" => "TEXT DEFAULT ''",
            "run_at" => "TIMESTAMPTZ DEFAULT now()",
            _ => return None,
        };
        Some(format!("ALTER TABLE {table} ADD COLUMN {column} {definition}"))
    }
}

/// MySQL / MariaDB: minimal bookkeeping shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MySql;

impl Dialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn table_exists_sql(&self, table: &str) -> String {
        format!(
            "SELECT table_name FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = '{table}'"
        )
    }

    fn create_table_sql(&self, table: &str) -> String {
        format!("CREATE TABLE {table} (version BIGINT, PRIMARY KEY (version))")
    }
}

/// Microsoft SQL Server: minimal bookkeeping shape
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn table_exists_sql(&self, table: &str) -> String {
        format!("SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = '{table}'")
    }

    fn create_table_sql(&self, table: &str) -> String {
        format!("CREATE TABLE {table} (version BIGINT PRIMARY KEY)")
    }
}
