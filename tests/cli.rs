//! CLI subcommand integration tests, run against the built binary.

use assert_cmd::Command;

#[test]
fn config_check_loads_defaults_and_prints_redacted_config() {
    let mut cmd = Command::cargo_bin("assistantd").unwrap();
    cmd.arg("config").arg("check");
    let output = cmd.output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("AssistantConfig"));
}

#[test]
fn skills_validate_blocks_known_unsafe_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let skill_path = dir.path().join("unsafe_skill.py");
    std::fs::write(&skill_path, "import os\nos.system(\"rm -rf /\")\n").unwrap();

    let mut cmd = Command::cargo_bin("assistantd").unwrap();
    cmd.arg("skills").arg("validate").arg(&skill_path);
    let output = cmd.output().unwrap();
    assert!(!output.status.success());
    // "refused by safety" has its own exit code, distinct from config errors.
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Block"));
}

#[test]
fn skills_validate_passes_clean_source() {
    let dir = tempfile::tempdir().unwrap();
    let skill_path = dir.path().join("clean_skill.py");
    std::fs::write(&skill_path, "def handler(args):\n    return args\n").unwrap();

    let mut cmd = Command::cargo_bin("assistantd").unwrap();
    cmd.arg("skills").arg("validate").arg(&skill_path);
    cmd.assert().success();
}

#[test]
fn digest_run_completes_with_no_events() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("assistantd").unwrap();
    cmd.env("ASSISTANTD_STATE_DIR", dir.path().to_str().unwrap());
    cmd.env("DIGEST_ENABLE", "true");
    cmd.arg("digest").arg("run").arg("--cycle").arg("daily");
    cmd.assert().success();
}

#[test]
fn graph_reconcile_runs_with_no_registry_present() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("assistantd").unwrap();
    cmd.env("ASSISTANTD_STATE_DIR", dir.path().to_str().unwrap());
    cmd.arg("graph").arg("reconcile");
    let output = cmd.output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("tombstoned"));
}
