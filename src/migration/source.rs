//! Where migration files come from
//!
//! The catalog only needs to list file names and read bytes back, so file access sits behind
//! [`MigrationSource`]. [`DirectorySource`] is the filesystem implementation;
//! [`MemorySource`] keeps files in memory for tests and embedded migration sets.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

/// Lists and reads migration files
pub trait MigrationSource {
    /// Human-readable location, used in error messages
    fn location(&self) -> PathBuf;

    /// Names of the files in the source, in the source's own order
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the source cannot be listed.
    fn list(&self) -> io::Result<Vec<String>>;

    /// Path that [`MigrationSource::read`] accepts for a listed file name
    fn path(&self, filename: &str) -> PathBuf;

    /// Read the full content at `path`
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error (`NotFound` for unknown paths).
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Read the content at `path` as SQL text
    ///
    /// # Errors
    ///
    /// Returns `InvalidData` when the file is not valid UTF-8.
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Migration files in a filesystem directory
///
/// Only regular files directly inside the directory are listed; subdirectories are ignored.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    directory: PathBuf,
}

impl DirectorySource {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl MigrationSource for DirectorySource {
    fn location(&self) -> PathBuf {
        self.directory.clone()
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(name) => {
                    log::warn!("skipping file with non UTF-8 name: {}", name.to_string_lossy());
                }
            }
        }
        Ok(names)
    }

    fn path(&self, filename: &str) -> PathBuf {
        self.directory.join(filename)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }
}

/// In-memory migration files
///
/// Clones share the same file set, so a test can keep a handle and edit files after handing
/// the source to a [`Migrator`](crate::migration::Migrator).
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: Arc<RwLock<Vec<(String, Vec<u8>)>>>,
}

impl MemorySource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`MemorySource::insert`]
    #[must_use]
    pub fn with_file(self, filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.insert(filename, content);
        self
    }

    /// Add a file, replacing the content of an existing file with the same name
    pub fn insert(&self, filename: impl Into<String>, content: impl Into<Vec<u8>>) {
        let filename = filename.into();
        let content = content.into();
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        match files.iter_mut().find(|(name, _)| *name == filename) {
            Some(entry) => entry.1 = content,
            None => files.push((filename, content)),
        }
    }

    /// Remove a file; returns whether it existed
    pub fn remove(&self, filename: &str) -> bool {
        let mut files = self.files.write().unwrap_or_else(PoisonError::into_inner);
        let before = files.len();
        files.retain(|(name, _)| name != filename);
        files.len() != before
    }
}

impl MigrationSource for MemorySource {
    fn location(&self) -> PathBuf {
        PathBuf::from("<memory>")
    }

    fn list(&self) -> io::Result<Vec<String>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        Ok(files.iter().map(|(name, _)| name.clone()).collect())
    }

    fn path(&self, filename: &str) -> PathBuf {
        PathBuf::from(filename)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let files = self.files.read().unwrap_or_else(PoisonError::into_inner);
        files
            .iter()
            .find(|(name, _)| Path::new(name) == path)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no migration file {}", path.display()),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_directory_source_lists_files_only() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("1.up.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::create_dir(dir.path().join("2.up.sql")).unwrap();

        let source = DirectorySource::new(dir.path());
        let mut names = source.list().unwrap();
        names.sort();
        assert_eq!(names, vec!["1.up.sql".to_string(), "notes.txt".to_string()]);

        let path = source.path("1.up.sql");
        assert_eq!(source.read_to_string(&path).unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_directory_source_missing_directory() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::new(dir.path().join("missing"));
        assert!(source.list().is_err());
    }

    #[test]
    fn test_read_to_string_rejects_invalid_utf8() {
        let source = MemorySource::new().with_file("1.up.sql", vec![0xff, 0xfe]);
        let err = source.read_to_string(Path::new("1.up.sql")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_memory_source_keeps_insertion_order_and_replaces() {
        let source = MemorySource::new()
            .with_file("2.up.sql", "two")
            .with_file("1.up.sql", "one");
        source.insert("2.up.sql", "TWO");

        assert_eq!(source.list().unwrap(), vec!["2.up.sql", "1.up.sql"]);
        assert_eq!(source.read(Path::new("2.up.sql")).unwrap(), b"TWO");
    }

    #[test]
    fn test_memory_source_clones_share_files() {
        let source = MemorySource::new();
        let handle = source.clone();
        handle.insert("1.up.sql", "SELECT 1");
        assert_eq!(source.list().unwrap().len(), 1);

        assert!(handle.remove("1.up.sql"));
        assert!(!handle.remove("1.up.sql"));
        let err = source.read(Path::new("1.up.sql")).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
