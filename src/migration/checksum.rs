//! Checksum calculation for migration files

use crate::migration::source::MigrationSource;
use crate::migration::MigrationError;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Line ending every newline is rewritten to before hashing
///
/// Set this when migration files are checked out with different line endings on different
/// machines (for example `core.autocrlf` on Windows), so the same migration hashes the same
/// everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewlinePolicy {
    /// `\n`
    Lf,
    /// `\r\n`
    CrLf,
    /// `\r`
    Cr,
}

impl NewlinePolicy {
    fn ending(self) -> &'static [u8] {
        match self {
            NewlinePolicy::Lf => b"\n",
            NewlinePolicy::CrLf => b"\r\n",
            NewlinePolicy::Cr => b"\r",
        }
    }
}

/// Rewrite every `\r\n`, `\r` and `\n` in `content` to the policy's line ending
///
/// Works on raw bytes: `\r` and `\n` never occur inside multi-byte UTF-8 sequences.
pub fn normalize_newlines(content: &[u8], policy: NewlinePolicy) -> Vec<u8> {
    let ending = policy.ending();
    let mut out = Vec::with_capacity(content.len());
    let mut bytes = content.iter().copied().peekable();
    while let Some(byte) = bytes.next() {
        match byte {
            b'\r' => {
                if bytes.peek() == Some(&b'\n') {
                    bytes.next();
                }
                out.extend_from_slice(ending);
            }
            b'\n' => out.extend_from_slice(ending),
            other => out.push(other),
        }
    }
    out
}

/// Calculate the MD5 checksum of migration content
///
/// This is used to validate that migration files haven't been modified after being applied
/// to the database. The same `newline` policy must be used when the checksum is recorded and
/// when it is verified.
///
/// # Returns
///
/// Returns the 32-character lowercase hexadecimal digest.
pub fn checksum(content: &[u8], newline: Option<NewlinePolicy>) -> String {
    let mut hasher = Md5::new();
    match newline {
        Some(policy) => hasher.update(normalize_newlines(content, policy)),
        None => hasher.update(content),
    }
    format!("{:x}", hasher.finalize())
}

/// Read a migration file from `source` and calculate its checksum
///
/// # Errors
///
/// Returns [`MigrationError::SourceUnreadable`] if the file cannot be read.
pub fn file_checksum(
    source: &dyn MigrationSource,
    path: &Path,
    newline: Option<NewlinePolicy>,
) -> Result<String, MigrationError> {
    let content = source
        .read(path)
        .map_err(|e| MigrationError::SourceUnreadable {
            path: path.to_path_buf(),
            source: e,
        })?;
    Ok(checksum(&content, newline))
}

/// Validate checksum against stored value
///
/// An empty stored checksum always passes: rows written before the checksum column existed
/// carry the column default.
pub fn checksum_matches(stored: &str, current: &str) -> bool {
    stored.is_empty() || stored == current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::source::MemorySource;

    #[test]
    fn test_known_md5_vectors() {
        assert_eq!(checksum(b"", None), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(checksum(b"abc", None), "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_checksum_is_deterministic() {
        let sql = b"CREATE TABLE person (name TEXT);\nINSERT INTO person VALUES ('a');\n";
        let first = checksum(sql, None);
        assert_eq!(first, checksum(sql, None));
        assert_eq!(first.len(), 32);
        assert_eq!(
            checksum(sql, Some(NewlinePolicy::CrLf)),
            checksum(sql, Some(NewlinePolicy::CrLf))
        );
    }

    #[test]
    fn test_line_endings_differ_without_policy() {
        assert_ne!(checksum(b"a\nb\n", None), checksum(b"a\r\nb\r\n", None));
    }

    #[test]
    fn test_policy_makes_line_endings_irrelevant() {
        for policy in [NewlinePolicy::Lf, NewlinePolicy::CrLf, NewlinePolicy::Cr] {
            let lf = checksum(b"a\nb\n", Some(policy));
            assert_eq!(lf, checksum(b"a\r\nb\r\n", Some(policy)));
            assert_eq!(lf, checksum(b"a\rb\r", Some(policy)));
        }
    }

    #[test]
    fn test_normalize_newlines() {
        assert_eq!(normalize_newlines(b"a\r\nb\rc\n", NewlinePolicy::Lf), b"a\nb\nc\n");
        assert_eq!(
            normalize_newlines(b"a\nb\n", NewlinePolicy::CrLf),
            b"a\r\nb\r\n"
        );
        assert_eq!(normalize_newlines(b"a\r\n", NewlinePolicy::Cr), b"a\r");
        // EDGE CASE: no newlines at all
        assert_eq!(normalize_newlines(b"abc", NewlinePolicy::CrLf), b"abc");
        // EDGE CASE: multi-byte UTF-8 untouched
        let text = "caf\u{e9}\n".as_bytes();
        assert_eq!(
            normalize_newlines(text, NewlinePolicy::CrLf),
            "caf\u{e9}\r\n".as_bytes()
        );
    }

    #[test]
    fn test_file_checksum_reads_through_source() {
        let source = MemorySource::new().with_file("001.up.sql", "abc");
        let sum = file_checksum(&source, Path::new("001.up.sql"), None).unwrap();
        assert_eq!(sum, "900150983cd24fb0d6963f7d28e17f72");
    }

    #[test]
    fn test_file_checksum_missing_file() {
        let source = MemorySource::new();
        let err = file_checksum(&source, Path::new("404.up.sql"), None).unwrap_err();
        assert!(matches!(err, MigrationError::SourceUnreadable { .. }));
    }

    #[test]
    fn test_checksum_matches() {
        assert!(checksum_matches("abc", "abc"));
        assert!(!checksum_matches("abc", "abd"));
        // Legacy rows have an empty checksum
        assert!(checksum_matches("", "abc"));
    }
}
