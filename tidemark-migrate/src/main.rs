//! Tidemark Migration CLI Tool
//!
//! Command-line interface for applying versioned SQL migrations.
//! Supports both interactive use and CI/CD pipelines (`check` exits non-zero when migrations
//! are pending).
//!
//! There is no locking: do not run two migrations against the same database at once.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process;
use tidemark::migration::{DirectorySource, Migrator, MigrationStatus, Target};
use tidemark::{PostgresGateway, TidemarkConfig};
use tidemark_migrate::scaffold;
use tidemark_migrate::settings::{Overrides, Settings};

#[derive(Parser)]
#[command(name = "tidemark-migrate")]
#[command(about = "Versioned SQL migration tool")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL (falls back to TIDEMARK_DATABASE_URL, DATABASE_URL, then config)
    #[arg(long)]
    database_url: Option<String>,

    /// Migrations directory path (default: from config, else `migrations`)
    #[arg(long)]
    migrations_dir: Option<PathBuf>,

    /// Bookkeeping table name
    #[arg(long)]
    table: Option<String>,

    /// Configuration file
    #[arg(long, default_value = tidemark::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Write Prometheus metrics to this file when the command finishes
    #[arg(long)]
    metrics_file: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show migration status (applied vs pending)
    Status {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Migrate to a target version
    Migrate {
        /// Version number, `latest`, or `max` to apply every unapplied migration
        #[arg(default_value = "max")]
        target: String,

        /// Dry run - show what would be executed without running
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate checksums of applied migrations
    Validate,

    /// Show the current and the newest available version
    Version,

    /// Exit with status 1 when migrations are pending
    Check,

    /// Create an empty up/down migration pair
    New {
        /// Migration name (e.g., "create users table")
        name: String,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = run(&cli);

    if let Some(path) = &cli.metrics_file {
        if let Err(e) = write_metrics(path) {
            eprintln!("{} {e:#}", "⚠️  Failed to write metrics:".yellow());
        }
    }

    match result {
        Ok(true) => process::exit(0),
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("{} {e:#}", "❌ Error:".red().bold());
            process::exit(1);
        }
    }
}

/// Execute the command; `Ok(false)` means "completed, but report failure"
fn run(cli: &Cli) -> Result<bool> {
    let config = TidemarkConfig::load_from(&cli.config).context("Failed to load configuration")?;
    let settings = Settings::resolve(
        Overrides {
            database_url: cli.database_url.clone(),
            migrations_dir: cli.migrations_dir.clone(),
            table: cli.table.clone(),
        },
        &config,
        |var| std::env::var(var).ok(),
    );
    log::debug!(
        "migrations directory {}, bookkeeping table {}",
        settings.migrations_dir.display(),
        settings.options.table
    );

    // The migrator, and with it the connection, is dropped when the command returns
    match &cli.command {
        Commands::New { name } => handle_new(&settings, name),
        Commands::Status { json } => handle_status(&mut build_migrator(&settings)?, *json),
        Commands::Migrate { target, dry_run } => {
            handle_migrate(&mut build_migrator(&settings)?, target, *dry_run, cli.quiet)
        }
        Commands::Validate => handle_validate(&mut build_migrator(&settings)?),
        Commands::Version => handle_version(&mut build_migrator(&settings)?),
        Commands::Check => handle_check(&mut build_migrator(&settings)?),
    }
}

fn build_migrator(settings: &Settings) -> Result<Migrator> {
    let url = settings.database_url.as_deref().ok_or_else(|| {
        anyhow!(
            "Database URL not provided. Use --database-url, set TIDEMARK_DATABASE_URL or \
             DATABASE_URL, or add [database] url to the config file."
        )
    })?;
    let gateway = PostgresGateway::new(url)?;
    log::debug!("connecting lazily to PostgreSQL");
    let source = DirectorySource::new(&settings.migrations_dir);
    Ok(Migrator::new(settings.options.clone(), source, gateway)?)
}

fn handle_status(migrator: &mut Migrator, json: bool) -> Result<bool> {
    let status = migrator.status()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(true);
    }

    print_status(&status);
    Ok(true)
}

fn print_status(status: &MigrationStatus) {
    println!("\n📊 Migration Status\n");
    println!(
        "Current version: {} (latest available: {})",
        status.current_version,
        status
            .max_available
            .map_or_else(|| "none".to_string(), |v| v.to_string())
    );
    println!();

    if status.applied.is_empty() {
        println!("✅ Applied Migrations: None");
    } else {
        println!("✅ Applied Migrations ({}):", status.applied_count);
        for record in &status.applied {
            let name = record.name.as_deref().unwrap_or("");
            let applied_at = record.applied_at.map_or_else(
                || "N/A".to_string(),
                |at| at.format("%Y-%m-%d %H:%M:%S").to_string(),
            );
            let marker = if status.modified.contains(&record.version) {
                "✗ modified".red().to_string()
            } else if status.missing.contains(&record.version) {
                "? file missing".yellow().to_string()
            } else {
                "✓".green().to_string()
            };
            println!("  {marker} {} {name} ({applied_at})", record.version);
        }
    }

    println!();

    if status.pending.is_empty() {
        println!("⏳ Pending Migrations: None");
    } else {
        println!("⏳ Pending Migrations ({}):", status.pending_count);
        for pending in &status.pending {
            println!("  ⏳ {} ({})", pending.version, pending.filename);
        }
    }

    println!(
        "\n📈 Summary: {} applied, {} pending",
        status.applied_count, status.pending_count
    );
}

fn handle_migrate(migrator: &mut Migrator, target: &str, dry_run: bool, quiet: bool) -> Result<bool> {
    let target: Target = target.parse()?;

    if dry_run {
        let steps = migrator.plan(target)?;
        log::debug!("dry run for target {target}: {} steps", steps.len());
        if steps.is_empty() {
            println!("No migrations to run for target {target}");
        } else {
            println!("Would run {} migration(s):", steps.len());
            for (i, step) in steps.iter().enumerate() {
                println!("  {}. {} {}", i + 1, step.direction, step.filename);
            }
        }
        return Ok(true);
    }

    match migrator.migrate(target) {
        Ok(report) => {
            if !quiet {
                for step in &report.applied {
                    println!(
                        "  {} {} {} ({:?})",
                        "✓".green(),
                        step.direction,
                        step.filename,
                        step.duration
                    );
                }
                if report.applied.is_empty() {
                    println!("✅ No migrations to run (version {})", report.current_version);
                } else {
                    println!(
                        "✅ Migrated from version {} to {}",
                        report.previous_version, report.current_version
                    );
                }
            }
            Ok(true)
        }
        Err(failure) => {
            log::error!(
                "migration to {target} failed after {} completed steps",
                failure.completed.len()
            );
            if !failure.completed.is_empty() {
                eprintln!("Completed before the failure:");
                for step in &failure.completed {
                    eprintln!("  {} {} {}", "✓".green(), step.direction, step.filename);
                }
            }
            Err(failure.into())
        }
    }
}

fn handle_validate(migrator: &mut Migrator) -> Result<bool> {
    println!("Validating checksums...");
    let checked = migrator.verify_checksums()?;
    println!("✅ All checksums valid ({checked} applied migrations checked)");
    Ok(true)
}

fn handle_version(migrator: &mut Migrator) -> Result<bool> {
    let versions = migrator.versions()?;
    println!("Current version: {}", versions.current);
    match versions.max_available {
        Some(max) => println!("Latest available: {max}"),
        None => println!("Latest available: none"),
    }
    Ok(true)
}

fn handle_check(migrator: &mut Migrator) -> Result<bool> {
    if migrator.is_up_to_date()? {
        println!("✅ Database is up to date");
        Ok(true)
    } else {
        println!("{}", "⏳ Migrations are pending".yellow());
        Ok(false)
    }
}

fn handle_new(settings: &Settings, name: &str) -> Result<bool> {
    let created = scaffold::create_migration(&settings.migrations_dir, name)?;
    println!("✅ Generated migration {}:", created.version);
    println!("   {}", created.up.display());
    println!("   {}", created.down.display());
    Ok(true)
}

#[cfg(feature = "metrics")]
fn write_metrics(path: &std::path::Path) -> Result<()> {
    let text = tidemark::metrics::render()?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(not(feature = "metrics"))]
fn write_metrics(_path: &std::path::Path) -> Result<()> {
    anyhow::bail!("tidemark-migrate was built without the `metrics` feature")
}
