#![allow(deprecated)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use httpmock::prelude::*;
use predicates::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("testrail.toml");
    std::fs::write(&path, body).unwrap();
    path
}

fn cli() -> Command {
    Command::cargo_bin("testrail-reporter").unwrap()
}

#[test]
fn validate_accepts_complete_config() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[testrail]
host = "https://example.testrail.io"
user = "ci"
password = "secret"
project_id = 3
run_id = 12
"#,
    );

    cli()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Target: run 12"));
}

#[test]
fn validate_rejects_missing_host() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        r#"
[testrail]
user = "ci"
password = "secret"
project_id = 3
"#,
    );

    cli()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Please provide proper Testrail host"));
}

#[test]
fn validate_skips_checks_when_disabled() {
    let dir = TempDir::new().unwrap();
    let config = write_config(dir.path(), "[testrail]\nenabled = false\n");

    cli()
        .arg("--config")
        .arg(&config)
        .arg("validate")
        .assert()
        .success();
}

#[test]
fn init_writes_starter_config_once() {
    let dir = TempDir::new().unwrap();

    cli().current_dir(dir.path()).arg("init").assert().success();

    let written = std::fs::read_to_string(dir.path().join("testrail.toml")).unwrap();
    assert!(written.contains("[testrail]"));
    assert!(written.contains("Test case {tag} failed: {error}"));

    cli()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn replay_publishes_event_log() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/get_run/10");
        then.status(200).json_body(json!({"id": 10}));
    });
    server.mock(|when, then| {
        when.method(POST).path("/api/v2/update_run/10");
        then.status(200).json_body(json!({"id": 10}));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/v2/get_cases/1&suite_id=1");
        then.status(200).json_body(json!([{"id": 1}, {"id": 2}]));
    });
    let add_results = server.mock(|when, then| {
        when.method(POST)
            .path("/api/v2/add_results_for_cases/10")
            .body_includes("Test case @C1 passed")
            .body_includes("Test case @C2 failed: boom");
        then.status(200).json_body(json!([{"id": 100}, {"id": 101}]));
    });

    let dir = TempDir::new().unwrap();
    let config = write_config(
        dir.path(),
        &format!(
            r#"
[testrail]
host = "{}"
api_path = "/api/v2/"
user = "ci"
password = "secret"
project_id = 1
suite_id = 1
run_id = 10
close_test_run = false
"#,
            server.base_url()
        ),
    );
    let events = dir.path().join("events.jsonl");
    std::fs::write(
        &events,
        r#"{"event":"test_passed","test":{"id":"t1","title":"Login","tags":["@C1"],"duration":1200}}
{"event":"test_failed","test":{"id":"t2","title":"Checkout","tags":["@C2"]},"error":{"message":"boom"}}
{"event":"all_finished"}
"#,
    )
    .unwrap();

    cli()
        .arg("--config")
        .arg(&config)
        .arg("replay")
        .arg(&events)
        .assert()
        .success()
        .stdout(predicate::str::contains("Test Results:"));

    add_results.assert_calls(1);
}
