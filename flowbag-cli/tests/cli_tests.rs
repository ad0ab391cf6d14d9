//! End-to-end tests for the `flowbag` binary.
//!
//! Each test runs the compiled binary inside a temporary directory so the
//! default `flowbag.toml` lookup never finds a stray file.

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

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn cat_json(dir: &Path, file: &str) -> serde_json::Value {
    let output = flowbag(dir, &["--output", "json", "cat", file]);
    assert!(
        output.status.success(),
        "cat should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("cat --output json should print JSON")
}

const FLOWS: &str = concat!(
    "{\"sip\":\"10.0.0.1\",\"dport\":80,\"protocol\":6,\"bytes\":100}\n",
    "{\"sip\":\"10.0.0.2\",\"dport\":80,\"protocol\":6,\"bytes\":50}\n",
    "{\"sip\":\"10.0.0.1\",\"dport\":443,\"protocol\":6,\"bytes\":10}\n",
);

const ROWS: &str = "sIPv4|dPort|records|\n10.0.0.1|80|5|\n10.0.0.2|22|7|\n";

#[test]
fn test_accumulate_then_cat() {
    // Given: three flow records
    let temp_dir = TempDir::new().expect("should create temp dir");
    let dir = temp_dir.path();
    fs::write(dir.join("flows.json"), FLOWS).expect("should write flows");

    // When: counting them into a Bag and an Aggregate Bag
    let output = flowbag(
        dir,
        &[
            "accumulate",
            "--output-spec",
            "sIPv4:records:by-source.bag",
            "--output-spec",
            "sIPv4,dPort:records,sum-bytes:pairs.agg",
            "--note-add",
            "test run",
            "flows.json",
        ],
    );

    // Then: both files exist and hold the expected rows
    assert!(
        output.status.success(),
        "accumulate should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(stdout(&output).contains("Accumulated 3 records"));

    let by_source = cat_json(dir, "by-source.bag");
    assert_eq!(by_source["format"], "bag");
    assert_eq!(by_source["rows"][0]["keys"], serde_json::json!(["10.0.0.1"]));
    assert_eq!(by_source["rows"][0]["counters"], serde_json::json!([2]));
    assert_eq!(by_source["rows"][1]["counters"], serde_json::json!([1]));

    let pairs = cat_json(dir, "pairs.agg");
    assert_eq!(pairs["format"], "aggbag");
    assert_eq!(pairs["rows"].as_array().map(Vec::len), Some(3));
    assert_eq!(pairs["annotations"], serde_json::json!(["test run"]));
}

#[test]
fn test_accumulate_requires_outputs() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let dir = temp_dir.path();
    fs::write(dir.join("flows.json"), FLOWS).expect("should write flows");

    let output = flowbag(dir, &["accumulate", "flows.json"]);

    assert_eq!(output.status.code(), Some(2), "missing outputs is a config error");
}

#[test]
fn test_build_tool_and_cat() {
    // Given: a text table built into an Aggregate Bag
    let temp_dir = TempDir::new().expect("should create temp dir");
    let dir = temp_dir.path();
    fs::write(dir.join("rows.txt"), ROWS).expect("should write rows");
    let build = flowbag(dir, &["build", "--output-path", "all.agg", "rows.txt"]);
    assert!(
        build.status.success(),
        "build should succeed: {}",
        String::from_utf8_lossy(&build.stderr)
    );

    // When: selecting two fields and keeping rows with at least 6 records
    let tool = flowbag(
        dir,
        &[
            "tool",
            "--select-fields",
            "sIPv4,records",
            "--min-field",
            "records=6",
            "--output-path",
            "busy.agg",
            "all.agg",
        ],
    );
    assert!(
        tool.status.success(),
        "tool should succeed: {}",
        String::from_utf8_lossy(&tool.stderr)
    );

    // Then: only the busy source remains
    let busy = cat_json(dir, "busy.agg");
    assert_eq!(busy["key_fields"], serde_json::json!(["sIPv4"]));
    assert_eq!(busy["rows"].as_array().map(Vec::len), Some(1));
    assert_eq!(busy["rows"][0]["keys"], serde_json::json!(["10.0.0.2"]));
    assert_eq!(busy["rows"][0]["counters"], serde_json::json!([7]));
}

#[test]
fn test_tool_subtract_self_is_empty() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let dir = temp_dir.path();
    fs::write(dir.join("rows.txt"), ROWS).expect("should write rows");
    let build = flowbag(dir, &["build", "--output-path", "all.agg", "rows.txt"]);
    assert!(build.status.success());

    let tool = flowbag(
        dir,
        &[
            "tool",
            "--subtract",
            "--output-path",
            "none.agg",
            "all.agg",
            "all.agg",
        ],
    );
    assert!(tool.status.success());

    let none = cat_json(dir, "none.agg");
    assert_eq!(none["rows"].as_array().map(Vec::len), Some(0));
}

#[test]
fn test_tool_to_ipset() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let dir = temp_dir.path();
    fs::write(dir.join("rows.txt"), ROWS).expect("should write rows");
    assert!(
        flowbag(dir, &["build", "--output-path", "all.agg", "rows.txt"])
            .status
            .success()
    );

    let tool = flowbag(
        dir,
        &["tool", "--to-ipset", "sIPv4", "--output-path", "sources.set", "all.agg"],
    );
    assert!(tool.status.success());

    let set = fs::read_to_string(dir.join("sources.set")).expect("ipset written");
    assert!(set.contains("10.0.0.1/32"));
    assert!(set.contains("10.0.0.2/32"));
}

#[test]
fn test_cat_delimited_text() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let dir = temp_dir.path();
    fs::write(dir.join("rows.txt"), ROWS).expect("should write rows");
    assert!(
        flowbag(dir, &["build", "--output-path", "all.agg", "rows.txt"])
            .status
            .success()
    );

    let output = flowbag(
        dir,
        &[
            "cat",
            "--no-columns",
            "--no-final-delimiter",
            "--column-separator",
            ",",
            "all.agg",
        ],
    );
    assert!(output.status.success());
    assert_eq!(
        stdout(&output),
        "sIPv4,dPort,records\n10.0.0.1,80,5\n10.0.0.2,22,7\n"
    );
}

#[test]
fn test_cat_corrupt_input_is_invalid_data() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let dir = temp_dir.path();
    fs::write(dir.join("junk.agg"), b"not a container at all").expect("should write junk");

    let output = flowbag(dir, &["cat", "junk.agg"]);

    assert_eq!(output.status.code(), Some(3));
}

#[test]
fn test_cat_missing_input_is_io_error() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let output = flowbag(temp_dir.path(), &["cat", "missing.agg"]);

    assert_eq!(output.status.code(), Some(10));
}
