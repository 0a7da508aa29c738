//! Migration catalog: every migration file of a source, indexed by version and direction

use crate::migration::checksum::{file_checksum, NewlinePolicy};
use crate::migration::file::{parse_filename, Direction, MigrationFile};
use crate::migration::source::MigrationSource;
use crate::migration::MigrationError;
use std::collections::{BTreeSet, HashMap};

/// How a catalog is built from its source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogOptions {
    /// Line-ending normalization applied before checksumming
    pub newline: Option<NewlinePolicy>,
    /// Reject malformed `.sql` file names instead of skipping them
    pub strict_filenames: bool,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        Self {
            newline: None,
            strict_filenames: true,
        }
    }
}

/// The migration files of one source
///
/// Built once per run. Descriptors keep the source's listing order; lookups by version do not
/// depend on it.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    files: Vec<MigrationFile>,
}

impl Catalog {
    /// Scan `source` and build the catalog
    ///
    /// Files whose extension is not `sql` are ignored. Up files are checksummed here so that
    /// the value recorded when a migration is applied matches what was read during planning.
    ///
    /// # Errors
    ///
    /// Returns errors if:
    /// - The source cannot be listed or an Up file cannot be read (`SourceUnreadable`)
    /// - A `.sql` file name is malformed and `strict_filenames` is set (`MalformedFilename`)
    /// - Two files share a version and direction (`DuplicateVersion`)
    pub fn build(
        source: &dyn MigrationSource,
        options: &CatalogOptions,
    ) -> Result<Self, MigrationError> {
        let names = source
            .list()
            .map_err(|e| MigrationError::SourceUnreadable {
                path: source.location(),
                source: e,
            })?;

        let mut files = Vec::new();
        let mut seen: HashMap<(i64, Direction), String> = HashMap::new();

        for filename in names {
            let parsed = match parse_filename(&filename) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => continue,
                Err(e) if !options.strict_filenames => {
                    log::warn!("skipping {filename}: {e}");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let key = (parsed.version, parsed.direction);
            if let Some(first) = seen.get(&key) {
                return Err(MigrationError::DuplicateVersion {
                    version: parsed.version,
                    direction: parsed.direction,
                    first: first.clone(),
                    second: filename,
                });
            }
            seen.insert(key, filename.clone());

            let path = source.path(&filename);
            let mut file = MigrationFile::new(parsed, filename, path);
            if file.is_up() {
                let checksum = file_checksum(source, &file.path, options.newline)?;
                file = file.with_checksum(checksum);
            }
            files.push(file);
        }

        log::debug!(
            "catalogued {} migration files from {}",
            files.len(),
            source.location().display()
        );
        Ok(Self { files })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// All descriptors in listing order
    pub fn iter(&self) -> impl Iterator<Item = &MigrationFile> {
        self.files.iter()
    }

    /// The Up file for `version`
    #[must_use]
    pub fn up(&self, version: i64) -> Option<&MigrationFile> {
        self.find(version, Direction::Up)
    }

    /// The Down file for `version`
    #[must_use]
    pub fn down(&self, version: i64) -> Option<&MigrationFile> {
        self.find(version, Direction::Down)
    }

    /// Versions that have an Up file, ascending
    #[must_use]
    pub fn up_versions(&self) -> BTreeSet<i64> {
        self.files
            .iter()
            .filter(|f| f.is_up())
            .map(|f| f.version)
            .collect()
    }

    /// Highest version with an Up file
    #[must_use]
    pub fn max_up_version(&self) -> Option<i64> {
        self.up_versions().last().copied()
    }

    fn find(&self, version: i64, direction: Direction) -> Option<&MigrationFile> {
        self.files
            .iter()
            .find(|f| f.version == version && f.direction == direction)
    }
}
