//! Core library for the `kubetest2-lambda` deployer.
//!
//! The crate provisions a single disposable Lambda AI instance for a test
//! run, waits until it is reachable over SSH, and tears it down again
//! together with the credentials generated for it (launch → wait for an
//! address → wait for SSH → terminate).

pub mod config;
pub mod deployer;
pub mod keys;
pub mod lambda;
pub mod probe;
pub mod provider;
pub mod test_support;
pub mod wait;

pub use config::{ConfigError, ConfigOverrides, DeployerConfig};
pub use deployer::{Deployer, DeployerError, LambdaDeployer, PROVIDER_NAME, Session};
pub use keys::{KeyError, KeyPaths, generate_key_pair, remove_key_pair};
pub use lambda::{LambdaClient, LambdaError};
pub use probe::{
    CommandOutput, CommandRunner, ProbeError, ProbeFuture, ProcessCommandRunner, SshCommandProbe,
    SshProbe, SshTarget,
};
pub use provider::{Instance, InstanceStatus, LaunchRequest, Provider, SshKey};
pub use wait::{
    CancelHandle, CancelToken, PollPolicy, READINESS_POLICY, WaitContext, WaitError,
    cancellation, poll_until,
};
