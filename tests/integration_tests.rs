//! Integration tests: CLI smoke tests and scripted scenario runs through the
//! `lsc` binary.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

const BOLUS_SCENARIO: &str = r#"
name = "bolus runs to completion"

[[steps]]
step = "device"
bolus = "in_progress"
units = 2.0
minutes = 4

[[steps]]
step = "expect"
mode = "bolusing"

[[steps]]
step = "bolus_progress"
delivered_units = 2.0
complete = true

[[steps]]
step = "device"
bolus = "none"

[[steps]]
step = "expect"
mode = "hidden"
pending = []
"#;

fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write fixture file");
    path
}

fn parse_json(stdout: &str) -> Value {
    let line = stdout
        .lines()
        .rev()
        .find(|line| line.trim_start().starts_with('{'))
        .expect("json line in stdout");
    serde_json::from_str(line).expect("valid json")
}

#[test]
fn help_command_prints_usage() {
    let result = common::run_cli_case("help_command_prints_usage", &["--help"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("Usage: lsc [OPTIONS] <COMMAND>"),
        "missing help banner; log: {}",
        result.log_path.display()
    );
}

#[test]
fn version_command_prints_version() {
    let result = common::run_cli_case("version_command_prints_version", &["--version"]);
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    assert!(
        result.stdout.contains("lsc"),
        "missing version output; log: {}",
        result.log_path.display()
    );
}

#[test]
fn subcommand_help_flags_work() {
    for subcommand in ["simulate", "watch", "derive", "config", "completions"] {
        let result = common::run_cli_case(&format!("help_{subcommand}"), &[subcommand, "--help"]);
        assert!(
            result.status.success(),
            "{subcommand} --help failed; log: {}",
            result.log_path.display()
        );
    }
}

#[test]
fn derive_json_reports_suspension() {
    let result = common::run_cli_case(
        "derive_json_reports_suspension",
        &["--json", "derive", "--basal", "suspended", "--recommendation", "1.5"],
    );
    assert!(
        result.status.success(),
        "expected success; log: {}",
        result.log_path.display()
    );
    let payload = parse_json(&result.stdout);
    assert_eq!(payload["command"], "derive");
    assert_eq!(payload["label"], "pump_suspended");
    assert_eq!(payload["mode"]["resuming"], false);
    assert_eq!(payload["action"], "resume_delivery");
}

#[test]
fn derive_json_canceling_has_no_action() {
    let result = common::run_cli_case(
        "derive_json_canceling_has_no_action",
        &["--json", "derive", "--bolus", "canceling"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json(&result.stdout);
    assert_eq!(payload["label"], "canceling_bolus");
    assert!(payload["action"].is_null());
}

#[test]
fn derive_rejects_negative_bolus_duration() {
    let result = common::run_cli_case(
        "derive_rejects_negative_bolus_duration",
        &["derive", "--bolus", "in-progress", "--bolus-ends-in=-3"],
    );
    assert_eq!(
        result.status.code(),
        Some(1),
        "expected user error; log: {}",
        result.log_path.display()
    );
}

#[test]
fn derive_rejects_out_of_range_bolus_duration() {
    let result = common::run_cli_case(
        "derive_rejects_out_of_range_bolus_duration",
        &["derive", "--bolus", "in-progress", "--bolus-ends-in", "9223372036854775807"],
    );
    assert_eq!(
        result.status.code(),
        Some(1),
        "expected user error; log: {}",
        result.log_path.display()
    );
    assert!(result.stderr.contains("out of range"), "log: {}", result.log_path.display());
}

#[test]
fn config_validate_accepts_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_file(
        dir.path(),
        "config.toml",
        "[refresh]\ntick_interval_ms = 2000\nfetch_timeout_ms = 500\n",
    );
    let config_arg = config.to_string_lossy().to_string();

    let result = common::run_cli_case(
        "config_validate_accepts_file",
        &["--json", "--config", &config_arg, "config", "validate"],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json(&result.stdout);
    assert_eq!(payload["valid"], true);
    assert!(payload["hash"].as_str().is_some_and(|h| !h.is_empty()));
}

#[test]
fn config_validate_rejects_zero_tick() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_file(dir.path(), "config.toml", "[refresh]\ntick_interval_ms = 0\n");
    let config_arg = config.to_string_lossy().to_string();

    let result = common::run_cli_case(
        "config_validate_rejects_zero_tick",
        &["--json", "--config", &config_arg, "config", "validate"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
    let payload = parse_json(&result.stdout);
    assert_eq!(payload["valid"], false);
}

#[test]
fn config_missing_explicit_path_is_user_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("absent.toml");
    let missing_arg = missing.to_string_lossy().to_string();

    let result = common::run_cli_case(
        "config_missing_explicit_path_is_user_error",
        &["--config", &missing_arg, "config", "show"],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
}

#[test]
fn simulate_scenario_passes() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_file(dir.path(), "config.toml", "");
    let scenario = write_file(dir.path(), "bolus.toml", BOLUS_SCENARIO);
    let config_arg = config.to_string_lossy().to_string();
    let scenario_arg = scenario.to_string_lossy().to_string();

    let result = common::run_cli_case(
        "simulate_scenario_passes",
        &["--json", "--config", &config_arg, "simulate", &scenario_arg],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let payload = parse_json(&result.stdout);
    assert_eq!(payload["command"], "simulate");
    assert_eq!(payload["passed"], true);
    assert_eq!(payload["final_mode"], "hidden");
    assert_eq!(payload["mismatches"].as_array().map(Vec::len), Some(0));
}

#[test]
fn simulate_failed_expectation_exits_partial() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_file(dir.path(), "config.toml", "");
    let scenario = write_file(
        dir.path(),
        "wrong.toml",
        "[[steps]]\nstep = \"expect\"\nmode = \"bolusing\"\n",
    );
    let config_arg = config.to_string_lossy().to_string();
    let scenario_arg = scenario.to_string_lossy().to_string();

    let result = common::run_cli_case(
        "simulate_failed_expectation_exits_partial",
        &["--no-color", "--config", &config_arg, "simulate", &scenario_arg],
    );
    assert_eq!(result.status.code(), Some(4), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("FAIL"), "log: {}", result.log_path.display());
}

#[test]
fn simulate_follow_streams_frames() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_file(dir.path(), "config.toml", "");
    let scenario = write_file(dir.path(), "bolus.toml", BOLUS_SCENARIO);
    let config_arg = config.to_string_lossy().to_string();
    let scenario_arg = scenario.to_string_lossy().to_string();

    let result = common::run_cli_case(
        "simulate_follow_streams_frames",
        &["--json", "--config", &config_arg, "simulate", "--follow", &scenario_arg],
    );
    assert!(result.status.success(), "log: {}", result.log_path.display());
    let json_lines = result
        .stdout
        .lines()
        .filter(|line| line.trim_start().starts_with('{'))
        .count();
    assert!(json_lines > 1, "expected frames before the report; log: {}", result.log_path.display());
}

#[test]
fn simulate_rejects_malformed_scenario() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = write_file(dir.path(), "config.toml", "");
    let scenario = write_file(dir.path(), "bad.toml", "[[steps]]\nstep = \"teleport\"\n");
    let config_arg = config.to_string_lossy().to_string();
    let scenario_arg = scenario.to_string_lossy().to_string();

    let result = common::run_cli_case(
        "simulate_rejects_malformed_scenario",
        &["--config", &config_arg, "simulate", &scenario_arg],
    );
    assert_eq!(result.status.code(), Some(1), "log: {}", result.log_path.display());
}

#[test]
fn completions_generate_for_bash() {
    let result = common::run_cli_case("completions_generate_for_bash", &["completions", "bash"]);
    assert!(result.status.success(), "log: {}", result.log_path.display());
    assert!(result.stdout.contains("lsc"));
}
