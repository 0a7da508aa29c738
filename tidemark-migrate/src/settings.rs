//! Merging command-line flags with configuration and environment

use std::path::PathBuf;
use tidemark::migration::MigratorOptions;
use tidemark::TidemarkConfig;

/// Environment variables consulted for the database URL, in order
pub const DATABASE_URL_VARS: [&str; 2] = ["TIDEMARK_DATABASE_URL", "DATABASE_URL"];

/// Flags that override configuration values
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub database_url: Option<String>,
    pub migrations_dir: Option<PathBuf>,
    pub table: Option<String>,
}

/// Everything needed to build a migrator
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub migrations_dir: PathBuf,
    pub options: MigratorOptions,
}

impl Settings {
    /// Resolve settings: flags first, then environment variables, then the config file
    ///
    /// `env` looks up one environment variable.
    pub fn resolve<F>(overrides: Overrides, config: &TidemarkConfig, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = overrides
            .database_url
            .or_else(|| DATABASE_URL_VARS.into_iter().find_map(&env))
            .or_else(|| config.database.url.clone())
            .filter(|url| !url.trim().is_empty());

        let mut options = config.migrations.migrator_options();
        if let Some(table) = overrides.table {
            options.table = table;
        }

        Self {
            database_url,
            migrations_dir: overrides
                .migrations_dir
                .unwrap_or_else(|| config.migrations.directory.clone()),
            options,
        }
    }
}
