//! # Tidemark
//!
//! Versioned SQL migration engine: resolves, verifies and applies `<version>.<up|down>.sql`
//! migration files against a database, recording progress in a bookkeeping table.
//!
//! - [`migration`]: catalog, resolver, runner and the [`Migrator`] session
//! - [`gateway`]: the database driver boundary and the PostgreSQL implementation
//! - [`dialect`]: bookkeeping table DDL per database engine
//! - [`config`]: settings from `config/tidemark.toml` and `TIDEMARK__*` variables
//!
//! See [README on GitHub](https://github.com/microscaler/tidemark) for the file conventions.

pub mod config;
pub mod dialect;
pub mod gateway;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod migration;
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::TidemarkConfig;
pub use gateway::{Connection, Gateway, GatewayError, PostgresGateway};
pub use migration::{
    MigrationError, MigrationFailure, MigrationReport, Migrator, MigratorOptions, Target,
};
