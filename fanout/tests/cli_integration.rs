// fanout/tests/cli_integration.rs

use assert_cmd::prelude::*;
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::{json, Value};
use std::fs;
use std::process::Output;
use std::time::Duration;
use tempfile::NamedTempFile;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Empty config file so discovery never picks up the machine's own config.
fn empty_config() -> NamedTempFile {
    NamedTempFile::new().expect("Failed to create temp file")
}

fn create_test_file(content: &str) -> NamedTempFile {
    let file = NamedTempFile::new().expect("Failed to create temp file");
    fs::write(file.path(), content).expect("Failed to write to temp file");
    file
}

/// Run the binary off the async runtime so the mock server keeps serving.
async fn run_fanout(args: Vec<String>) -> Output {
    tokio::task::spawn_blocking(move || {
        std::process::Command::cargo_bin("fanout")
            .unwrap()
            .args(&args)
            .arg("--no-progress")
            .output()
            .unwrap()
    })
    .await
    .unwrap()
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_help_lists_flags() {
    let mut cmd = Command::cargo_bin("fanout").unwrap();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--concurrency"))
        .stdout(predicate::str::contains("--retries"))
        .stdout(predicate::str::contains("--flatten"))
        .stdout(predicate::str::contains("--base-url"));
}

#[test]
fn test_no_urls_is_rejected() {
    let mut cmd = Command::cargo_bin("fanout").unwrap();

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("You must specify URLs"));
}

#[test]
fn test_concurrency_out_of_range() {
    let mut cmd = Command::cargo_bin("fanout").unwrap();
    cmd.args(["http://127.0.0.1:1/", "-c", "5000"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Concurrency must be between 1 and 1000"));
}

#[test]
fn test_unsupported_method() {
    let config = empty_config();
    let mut cmd = Command::cargo_bin("fanout").unwrap();
    cmd.args(["http://127.0.0.1:1/", "-X", "FETCH", "--no-progress"])
        .arg("--config")
        .arg(config.path());

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not a supported HTTP method"));
}

#[test]
fn test_missing_url_file() {
    let config = empty_config();
    let mut cmd = Command::cargo_bin("fanout").unwrap();
    cmd.args(["-f", "/definitely/not/here.txt", "--no-progress"])
        .arg("--config")
        .arg(config.path());

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("File not found"));
}

#[test]
fn test_payload_count_mismatch() {
    let config = empty_config();
    let payloads = create_test_file(r#"[{"a": 1}, {"a": 2}, {"a": 3}]"#);
    let mut cmd = Command::cargo_bin("fanout").unwrap();
    cmd.args(["http://127.0.0.1:1/a", "http://127.0.0.1:1/b", "-X", "POST", "--no-progress"])
        .arg("-d")
        .arg(payloads.path())
        .arg("--config")
        .arg(config.path());

    cmd.assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("2 != 3"));
}

#[tokio::test]
async fn test_get_results_in_order() {
    let server = MockServer::start().await;
    for i in 0..6u64 {
        Mock::given(method("GET"))
            .and(path(format!("/item/{}", i)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "id": i }))
                    .set_delay(Duration::from_millis((6 - i) * 20)),
            )
            .mount(&server)
            .await;
    }

    let config = empty_config();
    let urls = create_test_file("# items\n/item/0\n/item/1\n\n/item/2\n/item/3\n/item/4\n/item/5\n");
    let output = run_fanout(vec![
        "-b".to_string(),
        server.uri(),
        "-f".to_string(),
        urls.path().to_string_lossy().to_string(),
        "-c".to_string(),
        "3".to_string(),
        "--config".to_string(),
        config.path().to_string_lossy().to_string(),
    ])
    .await;

    assert_eq!(output.status.code(), Some(0));
    let ids: Vec<u64> = stdout_json(&output)
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_post_payload_file_to_single_path() {
    let server = MockServer::start().await;
    for i in 0..3 {
        Mock::given(method("POST"))
            .and(path("/post"))
            .and(body_json(json!({ "n": i })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "echo": i })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = empty_config();
    let payloads = create_test_file(r#"[{"n": 0}, {"n": 1}, {"n": 2}]"#);
    let output = run_fanout(vec![
        "/post".to_string(),
        "-X".to_string(),
        "post".to_string(),
        "-b".to_string(),
        server.uri(),
        "-d".to_string(),
        payloads.path().to_string_lossy().to_string(),
        "--config".to_string(),
        config.path().to_string_lossy().to_string(),
    ])
    .await;

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(
        stdout_json(&output),
        json!([{ "echo": 0 }, { "echo": 1 }, { "echo": 2 }])
    );
}

#[tokio::test]
async fn test_partial_failure_exit_code_and_error_slot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = empty_config();
    let output = run_fanout(vec![
        format!("{}/ok", server.uri()),
        format!("{}/broken", server.uri()),
        "--config".to_string(),
        config.path().to_string_lossy().to_string(),
    ])
    .await;

    assert_eq!(output.status.code(), Some(2));
    let values = stdout_json(&output);
    assert_eq!(values[0], json!({ "ok": true }));
    assert_eq!(values[1]["error"]["kind"]["kind"], "http_status");
    assert_eq!(values[1]["error"]["kind"]["status"], 500);
    assert_eq!(values[1]["error"]["attempts"], 1);
}

#[tokio::test]
async fn test_no_raise_for_status_keeps_error_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "detail": "missing" })))
        .mount(&server)
        .await;

    let config = empty_config();
    let output = run_fanout(vec![
        format!("{}/gone", server.uri()),
        "--no-raise-for-status".to_string(),
        "--config".to_string(),
        config.path().to_string_lossy().to_string(),
    ])
    .await;

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_json(&output), json!([{ "detail": "missing" }]));
}

#[tokio::test]
async fn test_flatten_and_lines_output() {
    let server = MockServer::start().await;
    for page in 0..2u64 {
        Mock::given(method("GET"))
            .and(path(format!("/page/{}", page)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([page * 2, page * 2 + 1])))
            .mount(&server)
            .await;
    }

    let config = empty_config();
    let output = run_fanout(vec![
        "/page/0".to_string(),
        "/page/1".to_string(),
        "-b".to_string(),
        server.uri(),
        "--flatten".to_string(),
        "-o".to_string(),
        "lines".to_string(),
        "--config".to_string(),
        config.path().to_string_lossy().to_string(),
    ])
    .await;

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout, "0\n1\n2\n3\n");
}

#[tokio::test]
async fn test_config_file_supplies_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("up")))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_file(&format!(
        "[defaults]\nbase_url = \"{}\"\nconcurrency = 5\n",
        server.uri()
    ));
    let output = run_fanout(args(&[
        "/status",
        "--config",
        &config.path().to_string_lossy(),
    ]))
    .await;

    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_json(&output), json!(["up"]));
}
