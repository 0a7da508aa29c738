//! Integration tests for the migration engine
//!
//! Migration files live in a temporary directory; the database is the in-memory
//! `FakeGateway`, so these tests need no server.
//!
//! Test flow per scenario:
//! 1. Write migration files
//! 2. Build a `Migrator` over the directory
//! 3. Migrate and inspect the report
//! 4. Verify the bookkeeping table

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use tempfile::TempDir;
use tidemark::migration::{
    DirectorySource, Direction, MigrationError, Migrator, MigratorOptions, NewlinePolicy, Target,
};
use tidemark::test_helpers::{FakeDatabase, FakeGateway};

/// Write `<v>.up.create-t<v>.sql` / `<v>.down.create-t<v>.sql` for each version
fn write_pairs(dir: &Path, versions: &[i64]) {
    for v in versions {
        fs::write(
            dir.join(format!("{v:03}.up.create-t{v}.sql")),
            format!("CREATE TABLE t{v} (id INT);\n"),
        )
        .expect("write up file");
        fs::write(
            dir.join(format!("{v:03}.down.create-t{v}.sql")),
            format!("DROP TABLE t{v};\n"),
        )
        .expect("write down file");
    }
}

fn migrator_for(dir: &Path, options: MigratorOptions) -> (Migrator, Rc<RefCell<FakeDatabase>>) {
    let gateway = FakeGateway::postgres();
    let db = gateway.database();
    let migrator =
        Migrator::new(options, DirectorySource::new(dir), gateway).expect("valid options");
    (migrator, db)
}

fn applied_versions(report: &tidemark::MigrationReport) -> Vec<i64> {
    report.applied.iter().map(|a| a.version).collect()
}

#[test]
fn test_migration_lifecycle() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1, 2, 3, 4, 5]);
    let (mut migrator, db) = migrator_for(dir.path(), MigratorOptions::default());

    // Up from an empty schema
    let report = migrator.migrate(Target::Version(3)).expect("migrate to 3");
    assert_eq!(applied_versions(&report), vec![1, 2, 3]);
    assert_eq!(report.current_version, 3);

    // Already at the target
    let report = migrator.migrate(Target::Version(3)).expect("migrate to 3 again");
    assert!(report.applied.is_empty());

    // All the way down
    let report = migrator.migrate(Target::Version(0)).expect("migrate to 0");
    assert_eq!(applied_versions(&report), vec![3, 2, 1]);
    assert!(report.applied.iter().all(|a| a.direction == Direction::Down));
    assert_eq!(migrator.current_version().unwrap(), 0);

    // Catch-up to the end
    let report = migrator.migrate("max".parse().unwrap()).expect("catch up");
    assert_eq!(applied_versions(&report), vec![1, 2, 3, 4, 5]);
    assert!(migrator.is_up_to_date().unwrap());
    assert_eq!(db.borrow().versions(), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_missing_table_created_before_any_step() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1]);
    let (mut migrator, db) = migrator_for(dir.path(), MigratorOptions::default());

    migrator.migrate(Target::Latest).unwrap();

    let executed = db.borrow().executed.clone();
    let created = executed
        .iter()
        .position(|sql| sql.starts_with("CREATE TABLE schemaversion"))
        .expect("bookkeeping table created");
    let first_body = executed
        .iter()
        .position(|sql| sql.contains("CREATE TABLE t1"))
        .expect("migration ran");
    assert!(created < first_body);
}

#[test]
fn test_out_of_order_file_is_caught_up() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1, 2, 3, 5]);
    let (mut migrator, db) = migrator_for(dir.path(), MigratorOptions::default());
    migrator.migrate(Target::AllUnapplied).unwrap();

    // A branch merged late adds version 4
    write_pairs(dir.path(), &[4]);
    assert!(!migrator.is_up_to_date().unwrap());

    // An explicit target below the current version would revert; catch-up fills the gap
    let report = migrator.migrate(Target::AllUnapplied).unwrap();
    assert_eq!(applied_versions(&report), vec![4]);
    assert_eq!(db.borrow().versions(), vec![1, 2, 3, 4, 5]);

    let again = migrator.migrate(Target::AllUnapplied).unwrap();
    assert!(again.applied.is_empty());
}

#[test]
fn test_tampered_file_applies_nothing() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1, 2, 3]);
    let (mut migrator, db) = migrator_for(dir.path(), MigratorOptions::default());
    migrator.migrate(Target::Version(2)).unwrap();

    fs::write(dir.path().join("002.up.create-t2.sql"), "CREATE TABLE t2 (id BIGINT);\n").unwrap();

    let failure = migrator.migrate(Target::Version(3)).unwrap_err();
    assert!(failure.completed.is_empty());
    match &failure.error {
        MigrationError::ChecksumMismatch {
            version, filename, ..
        } => {
            assert_eq!(*version, 2);
            assert_eq!(filename, "002.up.create-t2.sql");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(db.borrow().versions(), vec![1, 2]);
    assert!(!db.borrow().bodies.iter().any(|sql| sql.contains("t3")));
}

#[test]
fn test_newline_policy_ignores_checkout_line_endings() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("1.up.sql"), "CREATE TABLE a (id INT);\nSELECT 1;\n").unwrap();
    fs::write(dir.path().join("2.up.sql"), "CREATE TABLE b (id INT);\n").unwrap();
    let options = MigratorOptions {
        newline: Some(NewlinePolicy::Lf),
        ..MigratorOptions::default()
    };
    let (mut migrator, _db) = migrator_for(dir.path(), options);
    migrator.migrate(Target::Version(1)).unwrap();

    // Same migration checked out on Windows
    fs::write(dir.path().join("1.up.sql"), "CREATE TABLE a (id INT);\r\nSELECT 1;\r\n").unwrap();
    let report = migrator.migrate(Target::Version(2)).unwrap();
    assert_eq!(applied_versions(&report), vec![2]);
}

#[test]
fn test_failure_midway_reports_progress_and_recovers() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1, 2, 3]);
    fs::write(dir.path().join("002.up.create-t2.sql"), "CREATE TABLE t2 (id INT").unwrap();
    let (mut migrator, db) = migrator_for(dir.path(), MigratorOptions::default());
    db.borrow_mut().fail_on("CREATE TABLE t2 (id INT");

    let failure = migrator.migrate(Target::Latest).unwrap_err();
    let completed: Vec<i64> = failure.completed.iter().map(|a| a.version).collect();
    assert_eq!(completed, vec![1]);
    assert!(matches!(
        failure.error,
        MigrationError::MigrationFailed { version: 2, .. }
    ));
    assert_eq!(migrator.current_version().unwrap(), 1);

    // Fix the file and resume
    fs::write(dir.path().join("002.up.create-t2.sql"), "CREATE TABLE t2 (id BIGINT);").unwrap();
    db.borrow_mut().clear_failures();
    let report = migrator.migrate(Target::Latest).unwrap();
    assert_eq!(applied_versions(&report), vec![2, 3]);
}

#[test]
fn test_connection_released_after_every_run() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1, 2]);
    let (mut migrator, db) = migrator_for(dir.path(), MigratorOptions::default());

    migrator.migrate(Target::Version(1)).unwrap();
    db.borrow_mut().fail_on("t2");
    migrator.migrate(Target::Version(2)).unwrap_err();

    let db = db.borrow();
    assert_eq!(db.connects, 2);
    assert_eq!(db.disconnects, 2);
}

#[test]
fn test_strict_and_lenient_file_names() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1]);
    fs::write(dir.path().join("create_users.sql"), "CREATE TABLE users (id INT);").unwrap();
    fs::write(dir.path().join("README.md"), "not a migration").unwrap();

    let (mut strict, _db) = migrator_for(dir.path(), MigratorOptions::default());
    let failure = strict.migrate(Target::Latest).unwrap_err();
    match failure.error {
        MigrationError::MalformedFilename { filename, .. } => {
            assert_eq!(filename, "create_users.sql");
        }
        other => panic!("unexpected error: {other}"),
    }

    let lenient_options = MigratorOptions {
        strict_filenames: false,
        ..MigratorOptions::default()
    };
    let (mut lenient, _db) = migrator_for(dir.path(), lenient_options);
    let report = lenient.migrate(Target::Latest).unwrap();
    assert_eq!(applied_versions(&report), vec![1]);
}

#[test]
fn test_legacy_table_gains_checksum_columns() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1, 2]);
    let (mut migrator, db) = migrator_for(dir.path(), MigratorOptions::default());
    db.borrow_mut().create_table(&["version"]);

    migrator.migrate(Target::Latest).unwrap();

    let columns = db.borrow().columns();
    assert_eq!(columns, vec!["version", "name", "md5", "run_at"]);
    assert!(db.borrow().checksum(2).is_some_and(|md5| md5.len() == 32));
}

#[test]
fn test_status_json() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1, 2]);
    let (mut migrator, _db) = migrator_for(dir.path(), MigratorOptions::default());
    migrator.migrate(Target::Version(1)).unwrap();

    let status = migrator.status().unwrap();
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["current_version"], 1);
    assert_eq!(json["max_available"], 2);
    assert_eq!(json["applied"][0]["name"], "create-t1");
    assert_eq!(json["pending"][0]["filename"], "002.up.create-t2.sql");
}

#[test]
fn test_independent_sessions_do_not_share_state() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    write_pairs(dir_a.path(), &[1, 2, 3]);
    write_pairs(dir_b.path(), &[1]);

    let (mut a, db_a) = migrator_for(dir_a.path(), MigratorOptions::default());
    let (mut b, db_b) = migrator_for(dir_b.path(), MigratorOptions::default());

    a.migrate(Target::Latest).unwrap();
    b.migrate(Target::Latest).unwrap();

    assert_eq!(db_a.borrow().versions(), vec![1, 2, 3]);
    assert_eq!(db_b.borrow().versions(), vec![1]);
}

#[test]
fn test_latest_keeps_versions_without_up_files() {
    let dir = TempDir::new().unwrap();
    write_pairs(dir.path(), &[1, 2, 3, 4, 5]);
    let (mut migrator, db) = migrator_for(dir.path(), MigratorOptions::default());
    migrator.migrate(Target::Latest).unwrap();

    fs::remove_file(dir.path().join("004.up.create-t4.sql")).unwrap();
    fs::remove_file(dir.path().join("005.up.create-t5.sql")).unwrap();

    let report = migrator.migrate(Target::Latest).unwrap();
    assert!(report.applied.is_empty());
    assert_eq!(report.current_version, 5);
    assert_eq!(db.borrow().versions(), vec![1, 2, 3, 4, 5]);
    assert!(!db.borrow().bodies.iter().any(|sql| sql.starts_with("DROP TABLE")));
}
