//! Integration tests for the `stackform` CLI binary.
//!
//! Everything runs against the sandbox with state and configuration in a
//! temporary directory, so no test touches a real control plane or the
//! user's own configuration.
#![allow(clippy::unwrap_used)]

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

/// A `stackform` command isolated in `dir`.
fn stackform_cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("stackform");
    cmd.current_dir(dir)
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join("config"))
        .env("NO_COLOR", "1")
        .env_remove("STACKFORM_PROFILE")
        .env_remove("STACKFORM_STACK")
        .env_remove("STACKFORM_STATE")
        .env_remove("STACKFORM_REGION")
        .env_remove("STACKFORM_OUTPUT")
        .env_remove("STACKFORM_VAR_VPC_ID")
        .env_remove("STACKFORM_VAR_WEBUI_SECRET_KEY");
    cmd
}

/// A sandboxed command with every required variable bound.
fn sandbox_cmd(dir: &Path) -> assert_cmd::Command {
    let mut cmd = stackform_cmd(dir);
    cmd.args([
        "--sandbox",
        "--var",
        "vpc_id=vpc-0sandbox",
        "--var",
        "webui_secret_key=s3cr3t",
    ]);
    cmd
}

fn state_file(dir: &Path) -> PathBuf {
    dir.join("stackform.state.json")
}

fn stdout_of(cmd: &mut assert_cmd::Command) -> String {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "command failed:\n{}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout).unwrap()
}

fn applied(dir: &TempDir) {
    sandbox_cmd(dir.path())
        .args(["apply", "--yes"])
        .assert()
        .success();
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let dir = TempDir::new().unwrap();
    let output = stackform_cmd(dir.path()).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "{text}");
}

#[test]
fn test_help_lists_commands() {
    let dir = TempDir::new().unwrap();
    stackform_cmd(dir.path()).arg("--help").assert().success().stdout(
        predicate::str::contains("plan")
            .and(predicate::str::contains("apply"))
            .and(predicate::str::contains("destroy"))
            .and(predicate::str::contains("graph")),
    );
}

#[test]
fn test_completions_zsh() {
    let dir = TempDir::new().unwrap();
    stackform_cmd(dir.path())
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

#[test]
fn test_config_show_without_config_file() {
    let dir = TempDir::new().unwrap();
    stackform_cmd(dir.path())
        .args(["config", "show"])
        .assert()
        .success();
}

// ── Validation ──────────────────────────────────────────────────────

#[test]
fn test_validate_reports_ssh_advisory() {
    let dir = TempDir::new().unwrap();
    sandbox_cmd(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("is valid").and(predicate::str::contains("SSH")));
}

#[test]
fn test_missing_vpc_id_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    stackform_cmd(dir.path())
        .args(["--sandbox", "--var", "webui_secret_key=s3cr3t", "validate"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("vpc_id"));
}

#[test]
fn test_vpc_id_from_environment() {
    let dir = TempDir::new().unwrap();
    stackform_cmd(dir.path())
        .env("STACKFORM_VAR_VPC_ID", "vpc-0sandbox")
        .env("STACKFORM_VAR_WEBUI_SECRET_KEY", "s3cr3t")
        .args(["--sandbox", "validate"])
        .assert()
        .success();
}

#[test]
fn test_malformed_var_flag_is_usage_error() {
    let dir = TempDir::new().unwrap();
    sandbox_cmd(dir.path())
        .args(["--var", "novalue", "validate"])
        .assert()
        .code(2);
}

#[test]
fn test_malformed_target_is_usage_error() {
    let dir = TempDir::new().unwrap();
    sandbox_cmd(dir.path())
        .args(["plan", "--target", "not-an-address"])
        .assert()
        .code(2);
}

#[test]
fn test_unknown_stack() {
    let dir = TempDir::new().unwrap();
    sandbox_cmd(dir.path())
        .args(["--stack", "nope", "validate"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("llm-serving"));
}

// ── Graph ───────────────────────────────────────────────────────────

#[test]
fn test_graph_dot() {
    let dir = TempDir::new().unwrap();
    sandbox_cmd(dir.path())
        .args(["graph", "--dot"])
        .assert()
        .success()
        .stdout(
            predicate::str::starts_with("digraph")
                .and(predicate::str::contains("\"aws_ecs_service.webui\" -> ")),
        );
}

// ── Plan / apply / destroy ──────────────────────────────────────────

#[test]
fn test_plan_creates_everything_and_writes_no_state() {
    let dir = TempDir::new().unwrap();
    let out = stdout_of(sandbox_cmd(dir.path()).args(["-o", "json", "plan"]));
    let plan: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(plan["summary"]["create"], 25);
    assert_eq!(plan["summary"]["delete"], 0);
    assert!(!out.contains("s3cr3t"));
    assert!(!state_file(dir.path()).exists());
}

#[test]
fn test_apply_requires_confirmation_without_terminal() {
    let dir = TempDir::new().unwrap();
    sandbox_cmd(dir.path())
        .arg("apply")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn test_apply_then_outputs() {
    let dir = TempDir::new().unwrap();
    applied(&dir);
    assert!(state_file(dir.path()).exists());

    let url = stdout_of(stackform_cmd(dir.path()).args(["-o", "plain", "output", "webui_url"]));
    assert!(url.trim().starts_with("http://"), "{url}");
    assert!(url.contains(".elb.amazonaws.com"), "{url}");

    let pull = stdout_of(stackform_cmd(dir.path()).args([
        "-o",
        "plain",
        "output",
        "model_pull_command",
    ]));
    let dns = url.trim().trim_start_matches("http://");
    assert_eq!(
        pull.trim(),
        format!("curl -X POST http://{dns}/api/pull -d '{{\"name\": \"deepseek-r1:7b\"}}'")
    );
}

#[test]
fn test_second_plan_has_no_changes() {
    let dir = TempDir::new().unwrap();
    applied(&dir);
    sandbox_cmd(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("No changes"));
}

#[test]
fn test_state_list_and_show() {
    let dir = TempDir::new().unwrap();
    applied(&dir);

    let listed = stdout_of(stackform_cmd(dir.path()).args(["-o", "plain", "state", "list"]));
    assert_eq!(listed.lines().count(), 25);
    assert!(listed.lines().any(|l| l == "aws_lb.shared"));

    let shown = stdout_of(stackform_cmd(dir.path()).args([
        "state",
        "show",
        "aws_ecs_task_definition.webui",
    ]));
    assert!(!shown.contains("s3cr3t"), "secret leaked:\n{shown}");

    stackform_cmd(dir.path())
        .args(["state", "show", "aws_lb.missing"])
        .assert()
        .code(4);
}

#[test]
fn test_destroy_empties_state() {
    let dir = TempDir::new().unwrap();
    applied(&dir);

    sandbox_cmd(dir.path())
        .args(["destroy", "--yes"])
        .assert()
        .success();

    let listed = stdout_of(stackform_cmd(dir.path()).args(["-o", "json", "state", "list"]));
    let entries: serde_json::Value = serde_json::from_str(&listed).unwrap();
    assert_eq!(entries.as_array().unwrap().len(), 0);

    sandbox_cmd(dir.path())
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Nothing to destroy"));
}

#[test]
fn test_state_rm_forgets_resource() {
    let dir = TempDir::new().unwrap();
    applied(&dir);

    stackform_cmd(dir.path())
        .args(["--yes", "state", "rm", "aws_cloudwatch_log_group.webui"])
        .assert()
        .success();

    let listed = stdout_of(stackform_cmd(dir.path()).args(["-o", "plain", "state", "list"]));
    assert!(!listed.contains("aws_cloudwatch_log_group.webui"));
}

#[test]
fn test_refresh_after_apply_finds_no_drift() {
    let dir = TempDir::new().unwrap();
    applied(&dir);

    let out = stdout_of(sandbox_cmd(dir.path()).args(["-o", "json", "refresh"]));
    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["checked"], 25);
    assert_eq!(report["drifted"].as_array().unwrap().len(), 0);
    assert_eq!(report["vanished"].as_array().unwrap().len(), 0);
}
