//! Integration tests for the `ensemble-dash` binary.
//!
//! These tests validate argument parsing, help output, shell completions,
//! configuration handling and error exit codes, all without a live mesh.
#![allow(clippy::unwrap_used)]

use std::io::Write;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// Build a [`Command`] for the `ensemble-dash` binary with env isolation.
///
/// Clears all `ENSEMBLE_*` env vars and points config directories at a
/// nonexistent path so tests never touch the user's real configuration.
fn dash_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("ensemble-dash");
    cmd.env("HOME", "/tmp/ensemble-dash-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/ensemble-dash-test-nonexistent")
        .env_remove("ENSEMBLE_CONFIG")
        .env_remove("ENSEMBLE_ENDPOINT")
        .env_remove("ENSEMBLE_OUTPUT")
        .env_remove("ENSEMBLE_TICK_SECS")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

const WIDGETS: &str = r#"
endpoint = "ws://127.0.0.1:9"

[[widgets]]
kind = "contextview"
refresh = 300
params = { device = "global.context", field = "outdoor.temperature", title = "Outdoor" }

[[widgets]]
kind = "gauge"
"#;

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = dash_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    dash_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("mesh")
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("send"))
            .and(predicate::str::contains("widgets")),
    );
}

#[test]
fn test_version_flag() {
    dash_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ensemble-dash"));
}

#[test]
fn test_invalid_subcommand() {
    let output = dash_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success(), "Expected failure for invalid subcommand");
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    dash_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    dash_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    let file = config_file("");
    dash_cmd()
        .args(["config", "path", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(file.path().to_string_lossy().as_ref()));
}

#[test]
fn test_config_show_applies_endpoint_override() {
    let file = config_file(WIDGETS);
    dash_cmd()
        .args(["config", "show", "--endpoint", "ws://mesh.local:31075", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("ws://mesh.local:31075")
                .and(predicate::str::contains("[[widgets]]"))
                .and(predicate::str::contains("tick_secs = 5")),
        );
}

#[test]
fn test_malformed_config_is_a_config_error() {
    let file = config_file("tick_secs = \"soon\"");
    let output = dash_cmd()
        .args(["config", "show", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3), "Expected config exit code");
}

// ── Widgets ─────────────────────────────────────────────────────────

#[test]
fn test_widgets_table_flags_unknown_kinds() {
    let file = config_file(WIDGETS);
    dash_cmd()
        .args(["widgets", "--color", "never", "--config"])
        .arg(file.path())
        .assert()
        .success()
        .stdout(
            predicate::str::contains("contextview")
                .and(predicate::str::contains("Outdoor"))
                .and(predicate::str::contains("300s"))
                .and(predicate::str::contains("unknown")),
        );
}

#[test]
fn test_widgets_json() {
    let file = config_file(WIDGETS);
    let output = dash_cmd()
        .args(["widgets", "-o", "json", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let widgets: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(widgets[0]["kind"], "contextview");
    assert_eq!(widgets[0]["params"]["field"], "outdoor.temperature");
    assert_eq!(widgets[1]["refresh"], 0);
}

#[test]
fn test_watch_rejects_unknown_widget_kind() {
    let file = config_file(WIDGETS);
    let output = dash_cmd()
        .args(["watch", "--duration", "1", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(combined_output(&output).contains("gauge"));
}

// ── Send ────────────────────────────────────────────────────────────

#[test]
fn test_send_rejects_non_object_args() {
    let output = dash_cmd()
        .args(["send", "lighting.actions", "set_cosy", "--args", "[1]"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("--args"));
}

#[test]
fn test_send_without_broker_is_a_connection_error() {
    let file = config_file("connect_delay_ms = 0");
    let output = dash_cmd()
        .args(["send", "lighting.actions", "set_cosy", "--endpoint", "ws://127.0.0.1:9", "--config"])
        .arg(file.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7), "{}", combined_output(&output));
}
