//! Command-line interface definitions for the `kubetest2-lambda` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `kubetest2-lambda` binary.
#[derive(Debug, Parser)]
#[command(
    name = "kubetest2-lambda",
    about = "Provision and tear down a disposable Lambda AI instance for a test run",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Run the build step (a no-op for this provider).
    #[arg(long)]
    pub(crate) build: bool,
    /// Launch an instance and wait until it accepts SSH.
    #[arg(long)]
    pub(crate) up: bool,
    /// Print `true` when the run's instance is active, `false` otherwise.
    #[arg(long)]
    pub(crate) is_up: bool,
    /// Terminate the run's instance and remove generated credentials.
    ///
    /// When combined with `--up`, teardown still runs if provisioning fails.
    #[arg(long)]
    pub(crate) down: bool,
    /// Print the kubeconfig path (not supported by this provider).
    #[arg(long)]
    pub(crate) kubeconfig: bool,
    /// Overrides for configuration loaded from files and the environment.
    #[command(flatten)]
    pub(crate) flags: DeployerFlags,
}

/// Per-invocation configuration overrides.
#[derive(Debug, Default, Args)]
pub(crate) struct DeployerFlags {
    /// Base name for the instance; a UTC timestamp is appended on `--up`.
    #[arg(long, value_name = "NAME")]
    pub(crate) instance_name: Option<String>,
    /// Region to launch in (for example `us-east-1`).
    #[arg(long, value_name = "REGION")]
    pub(crate) region: Option<String>,
    /// Instance type to launch (for example `gpu_1x_a100_sxm4`).
    #[arg(long, value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Image name to boot.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Name of an SSH key already registered with Lambda AI.
    ///
    /// When omitted, a key pair is generated for the run and removed on
    /// `--down`.
    #[arg(long, value_name = "NAME")]
    pub(crate) ssh_key: Option<String>,
    /// Login user for the SSH readiness check.
    #[arg(long, value_name = "USER")]
    pub(crate) ssh_user: Option<String>,
    /// Lambda AI API key. Prefer the `LAMBDA_AI_API_KEY` environment variable.
    #[arg(long, value_name = "KEY")]
    pub(crate) api_key: Option<String>,
}
