use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

fn script() -> tempfile::NamedTempFile {
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "at,command,user,ref,target,amount,start").unwrap();
    writeln!(csv, "2026-03-02T10:00:00Z,venue,,cafe,Cafe Babel,12,").unwrap();
    csv
}

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let csv = script();

    let mut cmd = Command::new(cargo_bin!("eventbook"));
    cmd.arg(csv.path()).arg("--db-path").arg("some_db");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""ref":"cafe""#))
        .stderr(predicate::str::contains("WARNING: Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let csv = script();
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("eventbook"));
    cmd.arg(csv.path()).arg("--db-path").arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("WARNING").not());
}
