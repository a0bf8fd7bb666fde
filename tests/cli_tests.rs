//! CLI tests for Stackform
//!
//! Every test runs the binary against its own temporary state directory, so
//! the sandbox control plane and stack state never leak between tests.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::tempdir;

// Helper to get a command for testing
fn stackform_cmd(state_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("stackform").unwrap();
    cmd.arg("--state-dir")
        .arg(state_dir)
        .arg("--no-color")
        .env_remove("STACKFORM_CONFIG")
        .env_remove("STACKFORM_ACCOUNT")
        .env_remove("STACKFORM_REGION")
        .env_remove("STACKFORM_STATE_DIR")
        .env_remove("RUST_LOG");
    cmd
}

fn json_stdout(cmd: &mut Command) -> Value {
    let output = cmd.output().unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).unwrap()
}

// ============================================================================
// Read-only commands
// ============================================================================

#[test]
fn test_help_lists_subcommands() {
    let dir = tempdir().unwrap();
    stackform_cmd(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("outputs"));
}

#[test]
fn test_synth_json() {
    let dir = tempdir().unwrap();
    let template = json_stdout(stackform_cmd(dir.path()).arg("synth"));

    assert_eq!(template["Resources"]["AppVpc"]["Type"], "AWS::EC2::VPC");
    assert_eq!(
        template["Resources"]["AppCluster"]["Properties"]["ClusterName"],
        "ontario-health-viz-cluster"
    );
    assert_eq!(
        template["Outputs"]["VpcId"]["Description"],
        "The ID of the VPC"
    );
}

#[test]
fn test_synth_yaml() {
    let dir = tempdir().unwrap();
    stackform_cmd(dir.path())
        .args(["synth", "--format", "yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resources:"))
        .stdout(predicate::str::contains("ontario-health-viz/water-quality-service"));
}

#[test]
fn test_validate() {
    let dir = tempdir().unwrap();
    stackform_cmd(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stack IacStack is valid"));

    let report = json_stdout(stackform_cmd(dir.path()).args(["validate", "--output", "json"]));
    assert_eq!(report["valid"], true);
    assert_eq!(report["outputs"], 3);
}

#[test]
fn test_validate_rejects_bad_region() {
    let dir = tempdir().unwrap();
    stackform_cmd(dir.path())
        .args(["validate", "--region", "Not A Region"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("region"));
}

#[test]
fn test_graph_is_dot() {
    let dir = tempdir().unwrap();
    stackform_cmd(dir.path())
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("digraph stack {"))
        .stdout(predicate::str::contains("\"AppVpc\" -> \"AppCluster\""));
}

#[test]
fn test_plan_on_fresh_state() {
    let dir = tempdir().unwrap();
    stackform_cmd(dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("AppVpc"))
        .stdout(predicate::str::contains("to create"));

    stackform_cmd(dir.path())
        .args(["plan", "--detailed-exitcode"])
        .assert()
        .code(2);
}

#[test]
fn test_outputs_before_deploy_fails() {
    let dir = tempdir().unwrap();
    stackform_cmd(dir.path())
        .arg("outputs")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("has not been deployed"));
}

// ============================================================================
// Deploy / destroy
// ============================================================================

#[test]
fn test_deploy_requires_confirmation_without_terminal() {
    let dir = tempdir().unwrap();
    stackform_cmd(dir.path())
        .arg("deploy")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--yes"));
}

#[test]
fn test_deploy_outputs_destroy_cycle() {
    let dir = tempdir().unwrap();

    stackform_cmd(dir.path())
        .args(["deploy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EcrRepoUri"));
    assert!(dir.path().join("IacStack.json").exists());

    let outputs = json_stdout(stackform_cmd(dir.path()).args(["outputs", "--output", "json"]));
    let vpc_id = outputs["VpcId"].as_str().unwrap();
    assert!(vpc_id.starts_with("vpc-"));
    assert_eq!(vpc_id.len(), 21);
    assert_eq!(
        outputs["EcrRepoUri"],
        "123456789012.dkr.ecr.ca-central-1.amazonaws.com/ontario-health-viz/water-quality-service"
    );
    assert_eq!(outputs["EcsClusterName"], "ontario-health-viz-cluster");

    // Nothing left to do
    stackform_cmd(dir.path())
        .args(["plan", "--detailed-exitcode"])
        .assert()
        .code(0)
        .stdout(predicate::str::contains("No changes"));

    stackform_cmd(dir.path())
        .args(["destroy", "--yes"])
        .assert()
        .success();
    assert!(!dir.path().join("IacStack.json").exists());

    stackform_cmd(dir.path())
        .arg("outputs")
        .assert()
        .code(1);

    stackform_cmd(dir.path())
        .args(["destroy", "--yes"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to destroy"));
}

#[test]
fn test_deploy_json_report() {
    let dir = tempdir().unwrap();
    let result = json_stdout(
        stackform_cmd(dir.path()).args(["deploy", "--yes", "--output", "json", "--region", "us-east-1"]),
    );

    assert_eq!(result["stack"], "IacStack");
    assert_eq!(result["plan"]["delete"], 0);
    assert!(result["plan"]["create"].as_u64().unwrap() > 3);
    assert!(result["report"]["outcomes"]
        .as_array()
        .unwrap()
        .iter()
        .all(|o| o["status"] == "succeeded"));
    assert!(result["outputs"]["EcrRepoUri"]
        .as_str()
        .unwrap()
        .contains(".dkr.ecr.us-east-1.amazonaws.com/"));
}

#[test]
fn test_completions() {
    let dir = tempdir().unwrap();
    stackform_cmd(dir.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stackform"));
}
