// Demo binary: workload run, window output, flag validation

use predicates::prelude::*;
use std::io::Write;

#[test]
fn test_text_output_lists_bottlenecks() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chokepoint");
    cmd.args(["--threads", "2", "--duration-ms", "120", "--window-ms", "50"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("=== "))
        .stdout(predicate::str::contains("db.primary"))
        .stdout(predicate::str::contains("accesses on 2 threads"));
}

#[test]
fn test_json_output_is_parseable() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chokepoint");
    cmd.args(["-t", "1", "-d", "60", "-w", "1000", "--format", "json"]);

    let output = cmd.output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);

    // Window reports first, process totals last; each is a complete document
    let documents: Vec<serde_json::Value> = serde_json::Deserializer::from_str(&stdout)
        .into_iter::<serde_json::Value>()
        .collect::<Result<_, _>>()
        .unwrap();
    assert!(documents.len() >= 2);
    assert!(documents[0]["window"]["size_ms"].as_u64() == Some(1000));
    assert!(documents.last().unwrap()["bottlenecks"].is_array());
}

#[test]
fn test_deny_flag_filters_output() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chokepoint");
    cmd.args(["-t", "2", "-d", "80", "--deny", "^db\\."]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("db.primary").not())
        .stdout(predicate::str::contains("db.replica").not());
}

#[test]
fn test_config_file_is_loaded() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "scope_name = \"demo\"").unwrap();
    writeln!(config, "allow = \"^cache$\"").unwrap();
    writeln!(config, "window_size_ms = 40").unwrap();

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chokepoint");
    cmd.args(["-t", "1", "-d", "60", "--config"]).arg(config.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("=== demo"))
        .stdout(predicate::str::contains("payment-api").not());
}

#[test]
fn test_zero_threads_rejected() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chokepoint");
    cmd.args(["--threads", "0"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--threads"));
}

#[test]
fn test_invalid_pattern_rejected() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chokepoint");
    cmd.args(["-d", "10", "--allow", "("]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Invalid bottleneck pattern"));
}

#[test]
fn test_missing_config_file_rejected() {
    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("chokepoint");
    cmd.args(["--config", "/nonexistent/chokepoint.toml"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("chokepoint.toml"));
}
