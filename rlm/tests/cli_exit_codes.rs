//! CLI tests for `rlm step`, `rlm loop` and `rlm config`.
//!
//! Spawns the binary with a stub generator and verifies exit codes and the
//! JSON printed on stdout.

use std::process::{Command, Output};

use rlm::exit_codes;
use serde_json::Value;

const RLM_VARS: &[&str] = &[
    "RLM_MOCK_MODE",
    "RLM_ALLOW_LOCAL_DISPATCH",
    "RLM_ACTIONS_VIA_REMOTE",
    "RLM_ALLOW_REAL_DISPATCH",
    "RLM_ALLOW_SELF_HEAL",
    "RLM_ALLOW_OUTBOUND",
    "RLM_VERTICAL_USE_CASE",
    "RLM_PROJECT_ROOT",
    "RLM_CODEGEN_OUTPUT_DIR",
    "RLM_CODE_REVIEW_OUTPUT_DIR",
    "RLM_STUB_JSON",
    "RLM_ORCHESTRATOR_URL",
    "RLM_ACTION_LOG",
];

fn rlm(dir: &std::path::Path, stub: Option<&str>, args: &[&str]) -> Output {
    rlm_command(dir, stub, args).output().expect("spawn rlm")
}

fn rlm_command(dir: &std::path::Path, stub: Option<&str>, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_rlm"));
    cmd.current_dir(dir).args(args);
    for var in RLM_VARS {
        cmd.env_remove(var);
    }
    if let Some(stub) = stub {
        cmd.env("RLM_STUB_JSON", stub);
    }
    cmd
}

#[test]
fn converged_step_exits_zero() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = rlm(
        temp.path(),
        Some(r#"{"thought":"done","action":null,"is_final":true}"#),
        &["step", "--query", "finish"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::CONVERGED));
    let summary: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(summary["summary"], "done");
    assert_eq!(summary["converged"], true);
}

#[test]
fn exhausted_loop_exits_not_converged() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = rlm(
        temp.path(),
        Some(r#"{"thought":"still thinking","is_final":false}"#),
        &["loop", "--query", "q", "--max-turns", "2"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::NOT_CONVERGED));
    let summaries: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(summaries.as_array().map(Vec::len), Some(2));
}

#[test]
fn mock_config_file_is_honoured() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("rlm.toml"), "mock_mode = true\n").expect("write config");
    let output = rlm(temp.path(), None, &["step", "--query", "hello"]);

    assert_eq!(output.status.code(), Some(exit_codes::CONVERGED));
    let summary: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert!(
        summary["summary"]
            .as_str()
            .is_some_and(|s| s.contains("MockMode"))
    );
}

#[test]
fn invalid_config_exits_with_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("rlm.toml"), "max_turns_limit = 0\n").expect("write config");
    let output = rlm(temp.path(), None, &["step", "--query", "q"]);

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&output.stderr).contains("max_turns_limit"));
}

#[test]
fn config_write_saves_effective_config() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("rlm.toml"), "max_turns_limit = 7\n").expect("write config");
    let output = rlm_command(temp.path(), None, &["config", "--write", "out/snapshot.toml"])
        .env("RLM_MOCK_MODE", "true")
        .output()
        .expect("spawn rlm");

    assert_eq!(output.status.code(), Some(exit_codes::CONVERGED));
    assert!(output.stdout.is_empty());
    let saved = temp.path().join("out/snapshot.toml");
    let loaded = rlm::io::config::load_config(&saved).expect("load snapshot");
    assert_eq!(loaded.max_turns_limit, 7);
    assert!(loaded.mock_mode, "env override is captured in the snapshot");
}

#[test]
fn config_without_write_prints_toml() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = rlm(temp.path(), None, &["config"]);

    assert_eq!(output.status.code(), Some(exit_codes::CONVERGED));
    let printed: rlm::io::config::BridgeConfig =
        toml::from_str(&String::from_utf8_lossy(&output.stdout)).expect("toml");
    assert_eq!(printed, rlm::io::config::BridgeConfig::default());
    assert!(!temp.path().join("out").exists());
}
