//! Migration file names and descriptors

use crate::migration::MigrationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// `<version>.<direction>[.<name>].sql`; the name may itself contain dots
static FILENAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^.]*)\.([^.]*)(?:\.(.+))?\.sql$").expect("filename pattern is valid")
});

const EXPECTED_FORMAT: &str = "expected <version>.<up|down>[.<name>].sql";

/// Which way a migration moves the schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Applies a version (`up` or `do` in file names)
    Up,
    /// Reverts a version (`down` or `undo` in file names)
    Down,
}

impl Direction {
    /// Parse a file name direction token; tokens are case-sensitive
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "up" | "do" => Some(Direction::Up),
            "down" | "undo" => Some(Direction::Down),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The parts encoded in a migration file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub version: i64,
    pub direction: Direction,
    /// Segments between direction and extension, joined with `.`; empty when absent
    pub name: String,
}

/// Parse a migration file name
///
/// Returns `Ok(None)` for files that are not migrations at all (final extension other than
/// `sql`, compared case-sensitively).
///
/// # Example
/// - `003.up.create.users.sql` → version 3, Up, name `create.users`
/// - `7.undo.sql` → version 7, Down, empty name
///
/// # Errors
///
/// Returns [`MigrationError::MalformedFilename`] for `.sql` files that do not follow the
/// convention, including version `0`, which is reserved for the empty schema.
pub fn parse_filename(filename: &str) -> Result<Option<ParsedFilename>, MigrationError> {
    if !filename.ends_with(".sql") {
        return Ok(None);
    }

    let malformed = |reason: String| MigrationError::MalformedFilename {
        filename: filename.to_string(),
        reason,
    };

    let caps = FILENAME_PATTERN
        .captures(filename)
        .ok_or_else(|| malformed(EXPECTED_FORMAT.to_string()))?;

    let version_str = &caps[1];
    if version_str.is_empty() || !version_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(format!(
            "version '{version_str}' is not a non-negative integer ({EXPECTED_FORMAT})"
        )));
    }
    let version: i64 = version_str
        .parse()
        .map_err(|_| malformed(format!("version '{version_str}' is out of range")))?;
    if version == 0 {
        return Err(malformed(
            "version 0 is reserved for the empty schema".to_string(),
        ));
    }

    let token = &caps[2];
    let direction = Direction::from_token(token).ok_or_else(|| {
        malformed(format!(
            "unknown direction '{token}' (expected up, do, down or undo)"
        ))
    })?;

    let name = caps.get(3).map_or("", |m| m.as_str()).to_string();

    Ok(Some(ParsedFilename {
        version,
        direction,
        name,
    }))
}

/// Descriptor of one discovered migration file
///
/// Holds where to read the SQL from, not the SQL itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: i64,
    pub direction: Direction,
    /// Human-readable migration name (may be empty)
    pub name: String,
    /// File name as listed by the source
    pub filename: String,
    /// Path handed back to the source when the SQL is needed
    pub path: PathBuf,
    /// MD5 checksum of the content at catalog time (Up files only)
    pub checksum: Option<String>,
}

impl MigrationFile {
    /// Create a descriptor from a parsed file name
    #[must_use]
    pub fn new(parsed: ParsedFilename, filename: String, path: PathBuf) -> Self {
        Self {
            version: parsed.version,
            direction: parsed.direction,
            name: parsed.name,
            filename,
            path,
            checksum: None,
        }
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: String) -> Self {
        self.checksum = Some(checksum);
        self
    }

    #[must_use]
    pub fn is_up(&self) -> bool {
        self.direction == Direction::Up
    }
}
