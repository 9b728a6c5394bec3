// ABOUTME: Integration tests for the slipway binary.
// ABOUTME: Covers help output, configuration exit codes, preflight failures, the run log and token masking.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

const ENV_VARS: &[&str] = &[
    "SLIPWAY_REPOSITORY",
    "SLIPWAY_BRANCH",
    "SLIPWAY_TOKEN",
    "SLIPWAY_HOST",
    "SLIPWAY_USER",
    "SLIPWAY_SSH_PORT",
    "SLIPWAY_SSH_KEY",
    "SLIPWAY_PORT",
    "SLIPWAY_SITE",
    "SLIPWAY_APP_BASE",
    "SLIPWAY_SOURCE_DIR",
];

/// The binary, run in `dir` with no SLIPWAY_* variables inherited.
fn slipway_cmd(dir: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("slipway"));
    cmd.current_dir(dir);
    for var in ENV_VARS {
        cmd.env_remove(var);
    }
    cmd
}

const COMPLETE_ARGS: &[&str] = &[
    "--non-interactive",
    "--repository",
    "https://github.com/acme/shop.git",
    "--branch",
    "main",
    "--host",
    "deploy@192.0.2.10",
];

#[test]
fn help_lists_modes_and_overrides() {
    let dir = tempfile::tempdir().unwrap();
    slipway_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--cleanup"))
        .stdout(predicate::str::contains("--non-interactive"))
        .stdout(predicate::str::contains("--source-dir"));
}

#[test]
fn missing_setting_without_prompting_exits_10() {
    let dir = tempfile::tempdir().unwrap();
    slipway_cmd(dir.path())
        .args(["--non-interactive", "--branch", "main"])
        .assert()
        .code(10)
        .stderr(predicate::str::contains("missing required setting"));
}

#[test]
fn environment_fills_missing_settings() {
    let dir = tempfile::tempdir().unwrap();
    // Everything but the port comes from the environment, so the run stops at the port.
    slipway_cmd(dir.path())
        .arg("--non-interactive")
        .env("SLIPWAY_REPOSITORY", "https://github.com/acme/shop.git")
        .env("SLIPWAY_BRANCH", "main")
        .env("SLIPWAY_HOST", "deploy@192.0.2.10")
        .env("SLIPWAY_SITE", "shop")
        .assert()
        .code(10)
        .stderr(predicate::str::contains("'port'"));
}

#[test]
fn invalid_port_exits_11() {
    let dir = tempfile::tempdir().unwrap();
    slipway_cmd(dir.path())
        .args(COMPLETE_ARGS)
        .args(["--site", "shop", "--port", "70000"])
        .assert()
        .code(11)
        .stderr(predicate::str::contains("invalid port"));
}

#[test]
fn invalid_site_exits_11() {
    let dir = tempfile::tempdir().unwrap();
    slipway_cmd(dir.path())
        .args(COMPLETE_ARGS)
        .args(["--port", "8080", "--site", "../etc"])
        .assert()
        .code(11);
}

#[test]
fn malformed_config_file_exits_12() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("slipway.yml"), "repository: [unclosed\n").unwrap();
    slipway_cmd(dir.path())
        .arg("--non-interactive")
        .assert()
        .code(12)
        .stderr(predicate::str::contains("YAML"));
}

#[test]
fn unknown_config_key_exits_12() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("slipway.yml"), "repo: https://example.com/x.git\n").unwrap();
    slipway_cmd(dir.path())
        .arg("--non-interactive")
        .assert()
        .code(12);
}

#[test]
fn explicit_missing_config_exits_12() {
    let dir = tempfile::tempdir().unwrap();
    slipway_cmd(dir.path())
        .args(["--non-interactive", "--config", "nope.yml"])
        .assert()
        .code(12)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn unresolved_template_placeholder_exits_61_before_connecting() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("site.conf"),
        "server { server_name {{DOMAIN}}; location / { proxy_pass http://127.0.0.1:{{PORT}}; } }\n",
    )
    .unwrap();
    fs::write(dir.path().join("slipway.yml"), "proxy_template: site.conf\n").unwrap();

    slipway_cmd(dir.path())
        .args(COMPLETE_ARGS)
        .args(["--site", "shop", "--port", "8080"])
        .assert()
        .code(61)
        .stderr(predicate::str::contains("DOMAIN"));
}

#[test]
fn json_mode_reports_failed_phase() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("site.conf"), "proxy_pass {{UPSTREAM}};\n").unwrap();
    fs::write(dir.path().join("slipway.yml"), "proxy_template: site.conf\n").unwrap();

    let output = slipway_cmd(dir.path())
        .args(COMPLETE_ARGS)
        .args(["--site", "shop", "--port", "8080", "--json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(61));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let outcome = stdout
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .find(|v| v["event"] == "outcome")
        .expect("an outcome event");
    assert_eq!(outcome["outcome"]["phase"], "preflight");
    assert_eq!(outcome["outcome"]["success"], false);
}

#[test]
fn every_run_writes_a_log_file() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("site.conf"), "{{UPSTREAM}}\n").unwrap();
    fs::write(dir.path().join("slipway.yml"), "proxy_template: site.conf\n").unwrap();

    slipway_cmd(dir.path())
        .args(COMPLETE_ARGS)
        .args(["--site", "shop", "--port", "8080"])
        .assert()
        .failure();

    let logs: Vec<_> = fs::read_dir(dir.path().join(".slipway/logs"))
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].starts_with("deploy-") && logs[0].ends_with(".log"));
}

#[test]
fn token_is_masked_in_run_log_and_terminal() {
    let dir = tempfile::tempdir().unwrap();
    let closed = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let raw = "ghp_rawsecretvalue1234";

    let output = slipway_cmd(dir.path())
        .env("SLIPWAY_TOKEN", raw)
        .args([
            "--non-interactive",
            "--repository",
            "https://github.com/acme/shop.git",
            "--branch",
            "main",
            "--site",
            "shop",
            "--port",
            "8080",
            "--host",
        ])
        .arg(format!("deploy@127.0.0.1:{closed}"))
        .output()
        .unwrap();
    assert!(!output.status.success());

    let logs: Vec<_> = fs::read_dir(dir.path().join(".slipway/logs"))
        .unwrap()
        .flatten()
        .map(|e| e.path())
        .collect();
    assert_eq!(logs.len(), 1);
    let content = fs::read_to_string(&logs[0]).unwrap();
    assert!(content.contains("repository token ghp_****1234"));
    assert!(!content.contains(raw));

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stdout.contains(raw));
    assert!(!stderr.contains(raw));
}

#[test]
fn quiet_conflicts_with_json() {
    let dir = tempfile::tempdir().unwrap();
    slipway_cmd(dir.path())
        .args(["--quiet", "--json"])
        .assert()
        .failure()
        .code(2);
}
