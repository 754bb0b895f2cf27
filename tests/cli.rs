//! End-to-end CLI checks that need no database.
//!
//! Everything here exercises the argument surface and the pre-connection
//! validation path: snapshot problems must surface with their stable exit
//! codes before any channel is resolved.

use assert_cmd::Command;
use catsync::sync::ENTITIES;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn catsync() -> Command {
    let mut cmd = Command::cargo_bin("catsync").unwrap();
    cmd.env_remove("CATSYNC_DB_PASSWORD");
    cmd.env_remove("RUST_LOG");
    cmd
}

/// Header-only flat files for every entity: a valid, empty snapshot.
fn write_empty_snapshot(dir: &Path) {
    for spec in &ENTITIES {
        let mut content = spec.columns.join("\t");
        content.push('\n');
        fs::write(dir.join(spec.file_name), content).unwrap();
    }
}

#[test]
fn test_help_lists_all_commands() {
    let output = catsync().arg("--help").output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["export", "import", "check", "version", "completions"] {
        assert!(stdout.contains(command), "help is missing `{command}`");
    }
}

#[test]
fn test_export_help_documents_password_env() {
    let output = catsync().args(["export", "--help"]).output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--output"));
    assert!(stdout.contains("--no-assets"));
    assert!(stdout.contains("CATSYNC_DB_PASSWORD"));
}

#[test]
fn test_version_human_and_json() {
    let output = catsync().arg("version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("catsync version "));

    let output = catsync().args(["version", "--json"]).output().unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("version --json emits valid JSON");
    assert_eq!(
        parsed["version"].as_str(),
        Some(env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn test_completions_emit_script() {
    let output = catsync().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("catsync"));
}

#[test]
fn test_import_missing_directory_exits_six() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("no-such-snapshot");

    let output = catsync()
        .args(["import", missing.to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Incomplete snapshot"));
    assert!(stderr.contains("products.tsv"));
}

#[test]
fn test_import_partial_snapshot_names_missing_file() {
    let tmp = TempDir::new().unwrap();
    write_empty_snapshot(tmp.path());
    fs::remove_file(tmp.path().join("images.tsv")).unwrap();

    let output = catsync()
        .args(["import", tmp.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("images.tsv"));
    assert!(!stderr.contains("products.tsv"));
}

#[test]
fn test_import_malformed_row_exits_seven_with_line() {
    let tmp = TempDir::new().unwrap();
    write_empty_snapshot(tmp.path());

    let header = ENTITIES[0].columns.join("\t");
    let mut cells = vec!["abc"];
    cells.resize(ENTITIES[0].columns.len(), "");
    fs::write(
        tmp.path().join("products.tsv"),
        format!("{header}\n{}\n", cells.join("\t")),
    )
    .unwrap();

    let output = catsync()
        .args(["import", tmp.path().to_str().unwrap()])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("products.tsv"));
    assert!(stderr.contains("line 2"));
}

#[test]
fn test_import_json_error_carries_machine_code() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("gone");

    let output = catsync()
        .args(["import", missing.to_str().unwrap(), "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));

    let parsed: serde_json::Value =
        serde_json::from_slice(&output.stderr).expect("--json errors are valid JSON");
    assert_eq!(parsed["error"]["code"].as_str(), Some("INCOMPLETE_SNAPSHOT"));
    assert_eq!(parsed["error"]["exit_code"].as_u64(), Some(6));
    assert_eq!(parsed["error"]["retryable"].as_bool(), Some(true));
}

#[test]
fn test_snapshot_validation_runs_before_connection() {
    // A valid snapshot gets past validation and fails on connection
    // resolution instead (empty shop root, direct mode, no overrides).
    let tmp = TempDir::new().unwrap();
    let snapshot = tmp.path().join("snap");
    fs::create_dir(&snapshot).unwrap();
    write_empty_snapshot(&snapshot);

    let output = catsync()
        .args([
            "import",
            snapshot.to_str().unwrap(),
            "--mode",
            "direct",
            "--shop-root",
            tmp.path().to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("No database configuration found"));
}

#[test]
fn test_export_without_config_exits_four() {
    let tmp = TempDir::new().unwrap();
    let out = tmp.path().join("snap");

    let output = catsync()
        .args([
            "export",
            "--mode",
            "direct",
            "--shop-root",
            tmp.path().to_str().unwrap(),
            "--output",
            out.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    // Nothing was written before the failure.
    assert!(!out.exists());

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Hint:"));
    assert!(stderr.contains("--db-host"));
}

#[test]
fn test_quiet_suppresses_error_text_but_keeps_exit_code() {
    let tmp = TempDir::new().unwrap();
    let missing = tmp.path().join("gone");

    let output = catsync()
        .args(["import", missing.to_str().unwrap(), "--quiet"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(6));
    assert!(output.stderr.is_empty());
}
