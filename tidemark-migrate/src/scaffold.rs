//! Creating new migration files

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tidemark::migration::{Catalog, CatalogOptions, DirectorySource};

/// Up and Down files written by [`create_migration`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMigration {
    pub version: i64,
    pub up: PathBuf,
    pub down: PathBuf,
}

/// Turn a free-text name into a file name segment
///
/// Whitespace runs become `-`; characters outside `[A-Za-z0-9_.-]` are dropped.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// Version following the highest one in `directory` (1 for an empty or missing directory)
///
/// Down-only versions count too, so a new file never collides with an existing one.
pub fn next_version(directory: &Path) -> Result<i64> {
    if !directory.exists() {
        return Ok(1);
    }
    let options = CatalogOptions {
        strict_filenames: false,
        ..CatalogOptions::default()
    };
    let catalog = Catalog::build(&DirectorySource::new(directory), &options)
        .with_context(|| format!("Failed to scan {}", directory.display()))?;
    let highest = catalog.iter().map(|f| f.version).max().unwrap_or(0);
    log::debug!("highest existing migration version in {}: {highest}", directory.display());
    Ok(highest + 1)
}

/// Write an empty Up/Down pair for the next version
pub fn create_migration(directory: &Path, name: &str) -> Result<NewMigration> {
    let slug = slugify(name);
    if slug.is_empty() {
        bail!("Migration name '{name}' has no usable characters");
    }

    fs::create_dir_all(directory)
        .with_context(|| format!("Failed to create migrations directory {}", directory.display()))?;

    let version = next_version(directory)?;
    let up = directory.join(format!("{version:03}.up.{slug}.sql"));
    let down = directory.join(format!("{version:03}.down.{slug}.sql"));
    let created = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

    write_new(&up, &format!("-- Migration {version}: {slug}\n-- Created: {created}\n\n"))?;
    write_new(
        &down,
        &format!("-- Revert migration {version}: {slug}\n-- Created: {created}\n\n"),
    )?;

    log::info!("created migration {version} in {}", directory.display());
    Ok(NewMigration { version, up, down })
}

fn write_new(path: &Path, content: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
