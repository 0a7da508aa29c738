//! `SchemaRecord` - Represents rows of the bookkeeping table

use crate::gateway::Row;
use crate::migration::MigrationError;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

/// Represents one row of the bookkeeping table
///
/// Minimal tables only store `version`; the other fields are `None` for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchemaRecord {
    /// Applied migration version
    pub version: i64,

    /// Migration name recorded when applied
    pub name: Option<String>,

    /// MD5 checksum of the Up file recorded when applied (empty for legacy rows)
    pub checksum: Option<String>,

    /// When the migration was applied
    pub applied_at: Option<DateTime<Utc>>,
}

impl SchemaRecord {
    /// Create a `SchemaRecord` holding only a version
    #[must_use]
    pub fn new(version: i64) -> Self {
        Self {
            version,
            name: None,
            checksum: None,
            applied_at: None,
        }
    }

    /// Create a `SchemaRecord` from a bookkeeping row
    ///
    /// Reads the `version` column and, when present, `name`, `md5` and `run_at`.
    ///
    /// # Errors
    ///
    /// Returns [`MigrationError::CorruptState`] if the version or timestamp cannot be parsed.
    pub fn from_row(row: &Row) -> Result<Self, MigrationError> {
        let version = parse_version(row.get("version"))?
            .ok_or_else(|| MigrationError::CorruptState("NULL version".to_string()))?;

        let applied_at = row.get("run_at").map(parse_timestamp).transpose()?;

        Ok(Self {
            version,
            name: row.get("name").map(str::to_string),
            checksum: row.get("md5").map(str::to_string),
            applied_at,
        })
    }
}

/// Parse a version value returned by the database (`None` for `NULL`)
pub(crate) fn parse_version(value: Option<&str>) -> Result<Option<i64>, MigrationError> {
    value
        .map(|v| {
            v.trim()
                .parse::<i64>()
                .map_err(|_| MigrationError::CorruptState(format!("version '{v}' is not an integer")))
        })
        .transpose()
}

/// Parse a timestamp in one of the text formats drivers produce
///
/// Values with an offset are converted to UTC; values without one are taken as UTC.
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, MigrationError> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    // PostgreSQL TIMESTAMPTZ text: 2024-01-20 12:00:00.123456+00
    for format in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(parsed) = DateTime::parse_from_str(value, format) {
            return Ok(parsed.with_timezone(&Utc));
        }
    }
    for format in [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(MigrationError::CorruptState(format!(
        "Failed to parse timestamp '{value}': unrecognized format"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_from_extended_row() {
        let row = Row::new(
            ["version", "name", "md5", "run_at"],
            [
                Some("3".to_string()),
                Some("add-email".to_string()),
                Some("abc".to_string()),
                Some("2024-01-20 12:30:45.5+02".to_string()),
            ],
        );
        let record = SchemaRecord::from_row(&row).unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(record.name.as_deref(), Some("add-email"));
        assert_eq!(record.checksum.as_deref(), Some("abc"));
        let at = record.applied_at.unwrap();
        assert_eq!(at.hour(), 10);
        assert_eq!(at.minute(), 30);
    }

    #[test]
    fn test_from_minimal_row() {
        let row = Row::new(["version"], [Some("7".to_string())]);
        assert_eq!(SchemaRecord::from_row(&row).unwrap(), SchemaRecord::new(7));
    }

    #[test]
    fn test_null_version_is_corrupt() {
        let row = Row::new(["version"], [None]);
        assert!(matches!(
            SchemaRecord::from_row(&row),
            Err(MigrationError::CorruptState(_))
        ));
    }

    #[test]
    fn test_parse_version() {
        assert_eq!(parse_version(None).unwrap(), None);
        assert_eq!(parse_version(Some("42")).unwrap(), Some(42));
        assert!(parse_version(Some("forty-two")).is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        for value in [
            "2024-01-20 12:00:00.123456+00",
            "2024-01-20 12:00:00+00:00",
            "2024-01-20T12:00:00Z",
            "2024-01-20 12:00:00.5",
            "2024-01-20 12:00:00",
            "2024-01-20T12:00:00",
        ] {
            let parsed = parse_timestamp(value)
                .unwrap_or_else(|e| panic!("{value} should parse: {e}"));
            assert_eq!(parsed.year(), 2024);
            assert_eq!(parsed.hour(), 12);
        }
        assert!(parse_timestamp("yesterday").is_err());
    }
}
