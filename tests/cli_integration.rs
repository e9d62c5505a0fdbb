//! CLI integration tests
//!
//! End-to-end tests for CLI commands using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn tierflow_cmd() -> Command {
    Command::cargo_bin("tierflow").unwrap()
}

/// Config pointing history and cache into `dir`.
fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let config = format!(
        r#"
[history]
path = "{history}"

[cache]
backend = "memory"

[upstream]
base_url = "http://127.0.0.1:9"
api_key_env = "TIERFLOW_TEST_NO_KEY"
"#,
        history = dir.path().join("history.sqlite").display()
    );
    let path = dir.path().join("tierflow.toml");
    std::fs::write(&path, config).unwrap();
    path
}

#[test]
fn test_version_output() {
    tierflow_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("tierflow"));
}

#[test]
fn test_help_shows_all_commands() {
    tierflow_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("stats"))
        .stdout(predicate::str::contains("quality"))
        .stdout(predicate::str::contains("import"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_run_help() {
    tierflow_cmd()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--input"))
        .stdout(predicate::str::contains("--policy"))
        .stdout(predicate::str::contains("--no-cache"));
}

#[test]
fn test_config_init_creates_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tierflow.toml");

    tierflow_cmd()
        .args(["config", "init", "-o", config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration file created"));

    let content = std::fs::read_to_string(&config_path).unwrap();
    assert!(content.contains("[routing]"));
}

#[test]
fn test_config_init_no_overwrite() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("tierflow.toml");
    std::fs::write(&config_path, "existing content").unwrap();

    tierflow_cmd()
        .args(["config", "init", "-o", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    assert_eq!(
        std::fs::read_to_string(&config_path).unwrap(),
        "existing content"
    );
}

#[test]
fn test_history_on_empty_store() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);

    tierflow_cmd()
        .args(["history", "-c", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No matching runs."));
}

#[test]
fn test_stats_json_on_empty_store() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);

    let output = tierflow_cmd()
        .args(["stats", "--json", "-c", config.to_str().unwrap()])
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(parsed["stats"]["total_runs"], 0);
}

#[test]
fn test_import_then_history_and_quality() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);
    let legacy = temp_dir.path().join("legacy.json");
    std::fs::write(
        &legacy,
        r#"[{"id":"old-1","workflow":"security_audit","success":true,
             "started_at":"2024-05-01T10:00:00Z","total_cost":0.01,"baseline_cost":0.04,
             "stages":[{"name":"triage","tier":"cheap","cost":0.01,"quality_score":0.4}]}]"#,
    )
    .unwrap();

    tierflow_cmd()
        .args(["import", legacy.to_str().unwrap(), "-c", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Imported 1 run(s)"));

    tierflow_cmd()
        .args(["history", "--json", "-c", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("old-1"));

    tierflow_cmd()
        .args(["quality", "-t", "0.7", "-c", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Underperforming"))
        .stdout(predicate::str::contains("triage"));
}

#[test]
fn test_run_missing_workflow_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);

    tierflow_cmd()
        .args([
            "run",
            temp_dir.path().join("absent.toml").to_str().unwrap(),
            "-i",
            "text",
            "-c",
            config.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("Error:"));
}

#[test]
fn test_run_with_unreachable_upstream_reports_failure() {
    let temp_dir = TempDir::new().unwrap();
    let config = write_config(&temp_dir);
    let workflow = temp_dir.path().join("wf.toml");
    std::fs::write(
        &workflow,
        r#"
name = "summarize"

[[stages]]
name = "summary"
complexity = "simple"
"#,
    )
    .unwrap();

    tierflow_cmd()
        .env("TIERFLOW_LOG_LEVEL", "error")
        .env("TIERFLOW_TIMEOUT_SECS", "2")
        .args([
            "run",
            workflow.to_str().unwrap(),
            "-i",
            "text",
            "-c",
            config.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("summarize"))
        .stderr(predicate::str::contains("did not complete"));

    tierflow_cmd()
        .args(["history", "--json", "-c", config.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"success\": false"));
}
