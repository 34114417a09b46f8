//! SSH liveness checks against a freshly launched instance.
//!
//! Probes are futures so a readiness wait can abandon an attempt that is
//! still running. Dropping a [`ProcessCommandRunner`] future kills the child.

use std::ffi::OsString;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::process::Command;

/// Boxed future returned by [`CommandRunner`] and [`SshProbe`].
pub type ProbeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProbeError>> + Send + 'a>>;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// The returned future resolves with [`ProbeError::Spawn`] if the command
    /// cannot be started.
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ProbeFuture<'a, CommandOutput>;
}

/// Real command runner that spawns host processes on the tokio runtime.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run<'a>(
        &'a self,
        program: &'a str,
        args: &'a [OsString],
    ) -> ProbeFuture<'a, CommandOutput> {
        Box::pin(async move {
            let output = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| ProbeError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;

            Ok(CommandOutput {
                code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            })
        })
    }
}

/// Errors raised by a single readiness probe.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProbeError {
    /// Raised when the probe command cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Error message from the OS.
        message: String,
    },
    /// Raised when the handshake or the remote command fails.
    #[error("ssh probe {status}: {stderr}")]
    Rejected {
        /// Exit status description.
        status: String,
        /// Captured standard error, trimmed.
        stderr: String,
    },
}

/// Where and as whom to probe.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Login user.
    pub user: String,
    /// Host name or IP address.
    pub host: String,
    /// Private key used for authentication.
    pub identity_file: Utf8PathBuf,
}

/// A single authenticated SSH round trip.
pub trait SshProbe {
    /// Attempts to log in and run a trivial command. The future resolves
    /// with a [`ProbeError`] when the host is not yet usable.
    fn probe<'a>(&'a self, target: &'a SshTarget) -> ProbeFuture<'a, ()>;
}

const SSH_PROGRAM: &str = "ssh";
const CONNECT_TIMEOUT_SECS: u32 = 10;
const READY_COMMAND: [&str; 2] = ["echo", "ssh-ready"];

/// Probe backed by the system `ssh` client.
#[derive(Clone, Debug)]
pub struct SshCommandProbe<R: CommandRunner> {
    runner: R,
}

impl SshCommandProbe<ProcessCommandRunner> {
    /// Creates a probe that spawns real `ssh` processes.
    #[must_use]
    pub const fn with_process_runner() -> Self {
        Self::new(ProcessCommandRunner)
    }
}

impl<R: CommandRunner> SshCommandProbe<R> {
    /// Creates a probe using the provided runner.
    #[must_use]
    pub const fn new(runner: R) -> Self {
        Self { runner }
    }

    /// Builds the argument list passed to `ssh`. Host keys are not verified
    /// because every instance is new, and interactive prompts are disabled.
    #[must_use]
    pub fn build_args(target: &SshTarget) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            OsString::from("-o"),
            OsString::from("StrictHostKeyChecking=no"),
            OsString::from("-o"),
            OsString::from("UserKnownHostsFile=/dev/null"),
            OsString::from("-o"),
            OsString::from(format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}")),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-i"),
            OsString::from(target.identity_file.as_str()),
            OsString::from(format!("{}@{}", target.user, target.host)),
        ];
        args.extend(READY_COMMAND.into_iter().map(OsString::from));
        args
    }
}

impl<R: CommandRunner + Sync> SshProbe for SshCommandProbe<R> {
    fn probe<'a>(&'a self, target: &'a SshTarget) -> ProbeFuture<'a, ()> {
        Box::pin(async move {
            let args = Self::build_args(target);
            let output = self.runner.run(SSH_PROGRAM, &args).await?;
            if output.is_success() {
                return Ok(());
            }

            Err(ProbeError::Rejected {
                status: output
                    .code
                    .map_or_else(|| String::from("terminated by signal"), |code| {
                        format!("exited with status {code}")
                    }),
                stderr: output.stderr.trim().to_owned(),
            })
        })
    }
}
