//! Behavioural smoke tests for the CLI entrypoint.
//!
//! None of these reach the network: each either fails before the first API
//! call or runs a step that makes no calls at all.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

fn isolated_cmd(workdir: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("kubetest2-lambda");
    cmd.current_dir(workdir.path())
        .env("HOME", workdir.path())
        .env("XDG_CONFIG_HOME", workdir.path())
        .env_remove("LAMBDA_AI_API_KEY")
        .env_remove("LAMBDA_AI_SSH_KEY");
    cmd
}

fn workdir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

#[test]
fn cli_without_actions_prints_usage() {
    let dir = workdir();
    isolated_cmd(&dir)
        .assert()
        .failure()
        .stderr(contains("Usage"));
}

#[test]
fn cli_up_without_api_key_names_every_source() {
    let dir = workdir();
    isolated_cmd(&dir)
        .arg("--up")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("LAMBDA_AI_API_KEY"))
        .stderr(contains("--api-key"));
}

#[test]
fn cli_kubeconfig_is_reported_as_unsupported() {
    let dir = workdir();
    isolated_cmd(&dir)
        .arg("--kubeconfig")
        .assert()
        .failure()
        .code(1)
        .stdout("")
        .stderr(contains("kubeconfig is not supported by the Lambda AI deployer"));
}

#[test]
fn cli_build_is_a_successful_no_op() {
    let dir = workdir();
    isolated_cmd(&dir).arg("--build").assert().success().stdout("");
}
