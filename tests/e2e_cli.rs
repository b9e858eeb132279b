//! CLI end-to-end tests
//!
//! Tests for the mediastash command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the mediastash binary
#[allow(deprecated)]
fn mediastash_cmd() -> Command {
    Command::cargo_bin("mediastash").unwrap()
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = mediastash_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version_command() {
    let mut cmd = mediastash_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("mediastash"));
}

#[test]
fn test_cli_validate_valid_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        format!(
            r#"
[server]
port = 9090

[cache]
dir = "{}"
ttl_secs = 600
orphan_ttl_secs = 300

[[refresh.sources]]
name = "Example"
url = "https://www.youtube.com/@example/videos"
"#,
            dir.path().join("cache").display()
        ),
    )
    .unwrap();

    let mut cmd = mediastash_cmd();
    cmd.arg("validate")
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("9090"))
        .stdout(predicate::str::contains("Refresh sources: 1"));
}

#[test]
fn test_cli_validate_rejects_orphan_ttl_above_ttl() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        "[cache]\nttl_secs = 600\norphan_ttl_secs = 900\n",
    )
    .unwrap();

    let mut cmd = mediastash_cmd();
    cmd.arg("validate").arg(&config_path).assert().failure();
}

#[test]
fn test_cli_sweep_json_report() {
    let dir = tempdir().unwrap();
    let cache_dir = dir.path().join("cache");
    fs::create_dir_all(&cache_dir).unwrap();
    fs::write(cache_dir.join("abc_720.mp4"), vec![0u8; 64]).unwrap();
    fs::write(cache_dir.join("def_720.mp4"), vec![0u8; 64]).unwrap();

    let config_path = dir.path().join("config.toml");
    fs::write(
        &config_path,
        format!(
            "[cache]\ndir = \"{}\"\nmax_size_bytes = 100\n",
            cache_dir.display()
        ),
    )
    .unwrap();

    let output = mediastash_cmd()
        .arg("--config")
        .arg(&config_path)
        .arg("sweep")
        .arg("--json")
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["evicted"], 1);
    assert_eq!(report["bytes_remaining"], 64);
}

#[test]
fn test_cli_refresh_without_sources_fails() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    fs::write(&config_path, "[refresh]\nenabled = true\n").unwrap();

    let mut cmd = mediastash_cmd();
    cmd.arg("--config")
        .arg(&config_path)
        .arg("refresh")
        .assert()
        .failure()
        .stderr(predicate::str::contains("No [[refresh.sources]] configured"));
}
