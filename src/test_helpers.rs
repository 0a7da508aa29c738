//! In-memory gateway for tests
//!
//! [`FakeGateway`] understands the bookkeeping statements the engine issues and keeps the
//! bookkeeping table in memory. Every other statement is treated as a migration body and
//! recorded. Tests keep a handle to the shared [`FakeDatabase`] to seed state, inject failures
//! and inspect what ran.

use crate::dialect::{Dialect, MySql, Postgres, EXTENDED_COLUMNS};
use crate::gateway::{Gateway, GatewayError, Row};
use crate::migration::state_table::DEFAULT_TABLE;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Fixed `run_at` value reported for every row
pub const FAKE_RUN_AT: &str = "2024-01-20 12:00:00+00";

static CREATE_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^CREATE TABLE (\w+) \((version BIGINT.*)\)$").unwrap());
static ADD_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ALTER TABLE (\w+) ADD COLUMN (\w+)").unwrap());
static COLUMN_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"column_name = '(\w+)'").unwrap());
static SELECT_CHECKSUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^SELECT md5 FROM \w+ WHERE version = (\d+)$").unwrap());
static INSERT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^INSERT INTO (\w+) \(([^)]*)\) VALUES \((.*)\)$").unwrap());
static DELETE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^DELETE FROM (\w+) WHERE version = (\d+)$").unwrap());

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct FakeRow {
    name: String,
    md5: String,
}

#[derive(Debug, Clone, Default)]
struct FakeTable {
    name: String,
    columns: Vec<String>,
    rows: BTreeMap<i64, FakeRow>,
}

impl FakeTable {
    fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

/// State shared by a [`FakeGateway`] and the test holding its handle
#[derive(Debug, Default)]
pub struct FakeDatabase {
    /// Successful connects
    pub connects: usize,
    /// Disconnects of a live connection
    pub disconnects: usize,
    /// Make every connect attempt fail
    pub refuse_connections: bool,
    /// Every statement received, in order
    pub executed: Vec<String>,
    /// Statements that were not bookkeeping, in order
    pub bodies: Vec<String>,
    failures: Vec<String>,
    table: Option<FakeTable>,
}

impl FakeDatabase {
    /// Fail every statement containing `fragment`
    pub fn fail_on(&mut self, fragment: &str) {
        self.failures.push(fragment.to_string());
    }

    pub fn clear_failures(&mut self) {
        self.failures.clear();
    }

    #[must_use]
    pub fn has_table(&self) -> bool {
        self.table.is_some()
    }

    /// Create the bookkeeping table with the given columns
    pub fn create_table(&mut self, columns: &[&str]) {
        self.create_named_table(DEFAULT_TABLE, columns);
    }

    /// Create a bookkeeping table called `name` with the given columns
    pub fn create_named_table(&mut self, name: &str, columns: &[&str]) {
        self.table = Some(FakeTable {
            name: name.to_string(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            rows: BTreeMap::new(),
        });
    }

    /// Columns of the bookkeeping table (empty when it does not exist)
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        self.table
            .as_ref()
            .map(|t| t.columns.clone())
            .unwrap_or_default()
    }

    /// Record applied versions as `(version, name, md5)`, creating an extended table if needed
    pub fn seed(&mut self, rows: &[(i64, &str, &str)]) {
        let table = self.table.get_or_insert_with(|| FakeTable {
            name: DEFAULT_TABLE.to_string(),
            columns: std::iter::once("version")
                .chain(EXTENDED_COLUMNS)
                .map(str::to_string)
                .collect(),
            rows: BTreeMap::new(),
        });
        for (version, name, md5) in rows {
            table.rows.insert(
                *version,
                FakeRow {
                    name: (*name).to_string(),
                    md5: (*md5).to_string(),
                },
            );
        }
    }

    /// Recorded versions, ascending
    #[must_use]
    pub fn versions(&self) -> Vec<i64> {
        self.table
            .as_ref()
            .map(|t| t.rows.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Recorded checksum of `version`
    #[must_use]
    pub fn checksum(&self, version: i64) -> Option<String> {
        self.table
            .as_ref()
            .and_then(|t| t.rows.get(&version))
            .map(|row| row.md5.clone())
    }

    fn run(&mut self, sql: &str) -> Result<Vec<Row>, GatewayError> {
        self.executed.push(sql.to_string());
        if let Some(fragment) = self.failures.iter().find(|f| sql.contains(f.as_str())) {
            return Err(GatewayError::query(format!(
                "forced failure on statement containing '{fragment}'"
            )));
        }

        let lower = sql.to_lowercase();
        if lower.contains("pg_tables") || lower.contains("information_schema.tables") {
            return Ok(if self.has_table() {
                vec![Row::new(["tablename"], [Some("schemaversion".to_string())])]
            } else {
                Vec::new()
            });
        }
        if lower.contains("information_schema.columns") {
            let column = COLUMN_NAME
                .captures(sql)
                .map(|c| c[1].to_string())
                .unwrap_or_default();
            let exists = self.table.as_ref().is_some_and(|t| t.has_column(&column));
            return Ok(if exists {
                vec![Row::new(["column_name"], [Some(column)])]
            } else {
                Vec::new()
            });
        }
        if let Some(caps) = CREATE_TABLE.captures(sql) {
            if self.has_table() {
                return Err(GatewayError::query("relation already exists"));
            }
            let definition = &caps[2];
            let mut columns = vec!["version"];
            columns.extend(EXTENDED_COLUMNS.iter().filter(|c| {
                definition
                    .split(',')
                    .any(|part| part.trim().starts_with(*c))
            }));
            self.create_named_table(&caps[1], &columns);
            return Ok(Vec::new());
        }
        if let Some(caps) = ADD_COLUMN.captures(sql).filter(|c| self.is_bookkeeping(&c[1])) {
            let table = self.table_mut()?;
            if table.has_column(&caps[2]) {
                return Err(GatewayError::query("column already exists"));
            }
            table.columns.push(caps[2].to_string());
            return Ok(Vec::new());
        }
        if sql.starts_with("SELECT MAX(version)") {
            let max = self.table_mut()?.rows.keys().next_back().map(i64::to_string);
            return Ok(vec![Row::new(["version"], [max])]);
        }
        if sql.starts_with("SELECT version, name, md5, run_at FROM") {
            let table = self.table_mut()?;
            return Ok(table
                .rows
                .iter()
                .map(|(version, row)| {
                    Row::new(
                        ["version", "name", "md5", "run_at"],
                        [
                            Some(version.to_string()),
                            Some(row.name.clone()),
                            Some(row.md5.clone()),
                            Some(FAKE_RUN_AT.to_string()),
                        ],
                    )
                })
                .collect());
        }
        if sql.starts_with("SELECT version FROM") {
            let table = self.table_mut()?;
            return Ok(table
                .rows
                .keys()
                .map(|v| Row::new(["version"], [Some(v.to_string())]))
                .collect());
        }
        if let Some(caps) = SELECT_CHECKSUM.captures(sql) {
            let version = parse_int(&caps[1])?;
            let table = self.table_mut()?;
            return Ok(table
                .rows
                .get(&version)
                .map(|row| Row::new(["md5"], [Some(row.md5.clone())]))
                .into_iter()
                .collect());
        }
        if let Some(caps) = INSERT.captures(sql).filter(|c| self.is_bookkeeping(&c[1])) {
            let columns: Vec<&str> = caps[2].split(',').map(str::trim).collect();
            let values = parse_values(&caps[3]);
            let value_of = |column: &str| {
                columns
                    .iter()
                    .position(|c| *c == column)
                    .and_then(|i| values.get(i).cloned())
                    .unwrap_or_default()
            };
            let version = parse_int(&value_of("version"))?;
            let row = FakeRow {
                name: value_of("name"),
                md5: value_of("md5"),
            };
            let table = self.table_mut()?;
            if table.rows.contains_key(&version) {
                return Err(GatewayError::query(format!(
                    "duplicate key value violates unique constraint (version)=({version})"
                )));
            }
            table.rows.insert(version, row);
            return Ok(Vec::new());
        }
        if let Some(caps) = DELETE.captures(sql).filter(|c| self.is_bookkeeping(&c[1])) {
            let version = parse_int(&caps[2])?;
            self.table_mut()?.rows.remove(&version);
            return Ok(Vec::new());
        }

        self.bodies.push(sql.to_string());
        Ok(Vec::new())
    }

    /// Whether `table` names the bookkeeping table (or the default one before it exists)
    fn is_bookkeeping(&self, table: &str) -> bool {
        match &self.table {
            Some(t) => t.name.eq_ignore_ascii_case(table),
            None => table.eq_ignore_ascii_case(DEFAULT_TABLE),
        }
    }

    fn table_mut(&mut self) -> Result<&mut FakeTable, GatewayError> {
        self.table
            .as_mut()
            .ok_or_else(|| GatewayError::query("relation \"schemaversion\" does not exist"))
    }
}

fn parse_int(value: &str) -> Result<i64, GatewayError> {
    value
        .parse()
        .map_err(|_| GatewayError::query(format!("invalid integer '{value}'")))
}

/// Split a `VALUES (...)` list, unquoting string literals
fn parse_values(list: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut current = String::new();
    let mut chars = list.chars().peekable();
    let mut quoted = false;
    while let Some(c) = chars.next() {
        match c {
            '\'' if quoted && chars.peek() == Some(&'\'') => {
                chars.next();
                current.push('\'');
            }
            '\'' => quoted = !quoted,
            ',' if !quoted => values.push(std::mem::take(&mut current).trim().to_string()),
            _ => current.push(c),
        }
    }
    values.push(current.trim().to_string());
    values
}

/// In-memory [`Gateway`]
#[derive(Debug)]
pub struct FakeGateway {
    database: Rc<RefCell<FakeDatabase>>,
    dialect: &'static dyn Dialect,
    connected: bool,
}

impl FakeGateway {
    pub fn new(dialect: &'static dyn Dialect) -> Self {
        Self {
            database: Rc::new(RefCell::new(FakeDatabase::default())),
            dialect,
            connected: false,
        }
    }

    /// Fake PostgreSQL: extended bookkeeping shape
    #[must_use]
    pub fn postgres() -> Self {
        Self::new(&Postgres)
    }

    /// Fake MySQL: minimal bookkeeping shape
    #[must_use]
    pub fn mysql() -> Self {
        Self::new(&MySql)
    }

    /// Handle to the shared database state
    #[must_use]
    pub fn database(&self) -> Rc<RefCell<FakeDatabase>> {
        Rc::clone(&self.database)
    }
}

impl Gateway for FakeGateway {
    fn dialect(&self) -> &dyn Dialect {
        self.dialect
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn connect(&mut self) -> Result<(), GatewayError> {
        let mut database = self.database.borrow_mut();
        if database.refuse_connections {
            return Err(GatewayError::connect("connection refused"));
        }
        database.connects += 1;
        self.connected = true;
        Ok(())
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Row>, GatewayError> {
        if !self.connected {
            return Err(GatewayError::connect("not connected"));
        }
        self.database.borrow_mut().run(sql)
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.database.borrow_mut().disconnects += 1;
        }
    }
}
