use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn config_file(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", body).unwrap();
    file
}

const ONE_TARGET: &str = r#"{
    "methods": ["GET", "POST"],
    "targets": [
        {"scenarioId": "search", "method": "GET", "uri": "http://127.0.0.1:9/search",
         "submissionType": "query-params", "validSubmission": "q=shoes;page=1"}
    ]
}"#;

/// Dry run prints the plan for every target and sends nothing.
#[test]
fn test_dry_run_prints_plan() {
    let config = config_file(ONE_TARGET);
    let path = config.path().to_str().unwrap();

    cargo_bin_cmd!("httpinject")
        .args(["-c", path, "--anomalies", "0", "--no-static", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "[DRY RUN] search: 4 variant(s) x 0 round(s) x 2 method(s) = 1 request(s)",
        ));
}

/// Running with no arguments should fail (clap requires a config or a database).
#[test]
fn test_no_args_shows_error() {
    cargo_bin_cmd!("httpinject").assert().failure();
}

#[test]
fn test_missing_config_is_fatal() {
    cargo_bin_cmd!("httpinject")
        .args(["-c", "/nonexistent/fuzz.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("/nonexistent/fuzz.json"));
}

#[test]
fn test_config_without_targets_is_fatal() {
    let config = config_file(r#"{"anomalies": 0}"#);
    cargo_bin_cmd!("httpinject")
        .args(["-c", config.path().to_str().unwrap()])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No targets configured"));
}

/// An unreachable target fails its valid case before any injection.
#[test]
fn test_unreachable_target_fails_valid_case() {
    let config = config_file(ONE_TARGET);
    cargo_bin_cmd!("httpinject")
        .args([
            "-c",
            config.path().to_str().unwrap(),
            "--db",
            ":memory:",
            "--anomalies",
            "0",
            "--timeout",
            "2",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("valid case for search failed"));
}

#[test]
fn test_mark_processed_and_list_new_on_empty_database() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("findings.sqlite");
    let db = db.to_str().unwrap();

    cargo_bin_cmd!("httpinject")
        .args(["--db", db, "--mark-processed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Marked 0 finding(s) as processed"));

    cargo_bin_cmd!("httpinject")
        .args(["--db", db, "--list-new"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0 new finding(s)"));
}

#[test]
fn test_list_new_without_database_fails() {
    let config = config_file(ONE_TARGET);
    cargo_bin_cmd!("httpinject")
        .args(["-c", config.path().to_str().unwrap(), "--list-new"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("need a findings database"));
}

#[test]
fn test_missing_payload_file_is_fatal() {
    let config = config_file(ONE_TARGET);
    cargo_bin_cmd!("httpinject")
        .args([
            "-c",
            config.path().to_str().unwrap(),
            "--anomalies",
            "0",
            "--payloads",
            "/nonexistent/payloads.txt",
            "--dry-run",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Cannot read payload file /nonexistent/payloads.txt"));
}
