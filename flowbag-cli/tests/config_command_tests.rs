//! Integration tests for `flowbag config` command.
//!
//! Tests config validation and display functionality with real TOML files.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn flowbag(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_flowbag"))
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .args(args)
        .output()
        .expect("should spawn flowbag")
}

const VALID_CONFIG: &str = r#"
[general]
log_level = "info"
log_format = "json"

[output]
notes_strip = true

[site.sensors]
S0 = 0
S1 = 1

[accumulator]
pmaps = ["svc=/etc/flowbag/svc.pmap"]

[[accumulator.outputs]]
keys = "sIPv4"
counters = "records"
path = "by-source.bag"
"#;

#[tokio::test]
async fn test_config_validate_valid_toml() {
    // Given: A valid config file
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("flowbag.toml");
    fs::write(&config_path, VALID_CONFIG).expect("should write config");

    // When: Loading the config
    let result = flowbag_core::config::FlowbagConfig::load(&config_path).await;

    // Then: Should succeed
    let config = result.expect("valid config should load successfully");
    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.accumulator.outputs.len(), 1);
}

#[tokio::test]
async fn test_config_validate_malformed_toml() {
    // Given: A malformed TOML file
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config_path = temp_dir.path().join("bad.toml");
    fs::write(&config_path, "[general\nlog_level = \"info\"\n").expect("should write bad config");

    // When: Loading the config
    let result = flowbag_core::config::FlowbagConfig::load(&config_path).await;

    // Then: Should fail
    assert!(result.is_err(), "malformed TOML should fail to load");
}

#[test]
fn test_config_validate_command_reports_valid() {
    // Given: A valid config file
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(temp_dir.path().join("flowbag.toml"), VALID_CONFIG).expect("should write config");

    // When: Running `flowbag config validate`
    let output = flowbag(temp_dir.path(), &["config", "validate"]);

    // Then: Exit code 0 and a VALID report
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("VALID"));
}

#[test]
fn test_config_validate_command_duplicate_stdout() {
    // Given: Two outputs writing to stdout
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = r#"
[[accumulator.outputs]]
keys = "sIPv4"
counters = "records"
path = "-"

[[accumulator.outputs]]
keys = "dIPv4"
counters = "records"
path = "-"
"#;
    fs::write(temp_dir.path().join("flowbag.toml"), config).expect("should write config");

    // When: Validating with JSON output
    let output = flowbag(temp_dir.path(), &["--output", "json", "config", "validate"]);

    // Then: Configuration exit code and a machine-readable report
    assert_eq!(output.status.code(), Some(2));
    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("report should be JSON");
    assert_eq!(report["valid"], false);
    assert!(
        report["errors"][0]
            .as_str()
            .is_some_and(|e| e.contains("stdout"))
    );
}

#[test]
fn test_config_explicit_missing_file_fails() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let output = flowbag(
        temp_dir.path(),
        &["--config", "missing.toml", "config", "show"],
    );

    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_config_show_defaults_without_file() {
    // Given: No config file in the working directory
    let temp_dir = TempDir::new().expect("should create temp dir");

    // When: Showing the general section
    let output = flowbag(temp_dir.path(), &["config", "show", "--section", "general"]);

    // Then: Defaults are printed
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("Configuration [general]"));
    assert!(text.contains("log_level = \"info\""));
}
