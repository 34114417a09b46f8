//! Lifecycle orchestration for a single disposable Lambda AI instance.
//!
//! [`LambdaDeployer`] drives the `up` and `down` state machines against any
//! [`Provider`] and [`SshProbe`]. Both waits during `up` share one
//! [`WaitContext`], so a caller can cancel a run or bound it with a deadline.

mod down;
mod error;
pub mod ownership;
mod session;
mod up;

use std::env;
use std::future::Future;
use std::pin::Pin;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::config::DeployerConfig;
use crate::keys::KeyPaths;
use crate::probe::SshProbe;
use crate::provider::Provider;
use crate::wait::{PollPolicy, READINESS_POLICY, WaitContext};

pub use error::DeployerError;
pub use session::Session;

/// Name reported to the host harness.
pub const PROVIDER_NAME: &str = "Lambda AI";

/// Boxed future returned by [`Deployer`] operations.
pub type DeployerFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations a test harness invokes on a deployer.
pub trait Deployer {
    /// Error type returned by every operation.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Human-readable provider name.
    fn provider_name(&self) -> &'static str;

    /// Prepares build artefacts. A no-op for providers that need none.
    ///
    /// # Errors
    ///
    /// Returns an error when the build step fails.
    fn build(&self) -> Result<(), Self::Error>;

    /// Provisions the instance and waits until it is reachable.
    fn up(&mut self) -> DeployerFuture<'_, (), Self::Error>;

    /// Tears down whatever `up` created.
    fn down(&self) -> DeployerFuture<'_, (), Self::Error>;

    /// Reports whether the instance exists and is active.
    fn is_up(&self) -> DeployerFuture<'_, bool, Self::Error>;

    /// Returns the path to a kubeconfig for the deployed cluster.
    ///
    /// # Errors
    ///
    /// Returns an error when the deployer does not produce a kubeconfig.
    fn kubeconfig(&self) -> Result<Utf8PathBuf, Self::Error>;
}

/// Deployer for one Lambda AI instance per run.
#[derive(Debug)]
pub struct LambdaDeployer<P, S> {
    config: DeployerConfig,
    provider: P,
    probe: S,
    session: Session,
    key_dir: Utf8PathBuf,
    ip_policy: PollPolicy,
    ssh_policy: PollPolicy,
    wait: WaitContext,
    clock: fn() -> DateTime<Utc>,
}

impl<P, S> LambdaDeployer<P, S>
where
    P: Provider,
    S: SshProbe,
{
    /// Creates a deployer with the default readiness budget (60 attempts,
    /// 10 seconds apart, per phase) and keys under the OS temp directory.
    #[must_use]
    pub fn new(config: DeployerConfig, provider: P, probe: S) -> Self {
        let session = Session::new(&config.instance_name, config.ssh_key_name());
        Self {
            config,
            provider,
            probe,
            session,
            key_dir: default_key_dir(),
            ip_policy: READINESS_POLICY,
            ssh_policy: READINESS_POLICY,
            wait: WaitContext::default(),
            clock: Utc::now,
        }
    }

    /// Overrides the directory holding the run's key pair.
    #[must_use]
    pub fn with_key_dir(mut self, key_dir: impl Into<Utf8PathBuf>) -> Self {
        self.key_dir = key_dir.into();
        self
    }

    /// Overrides the retry budgets for the address and SSH phases.
    #[must_use]
    pub const fn with_poll_policies(mut self, ip: PollPolicy, ssh: PollPolicy) -> Self {
        self.ip_policy = ip;
        self.ssh_policy = ssh;
        self
    }

    /// Attaches cancellation and an optional deadline to every wait.
    #[must_use]
    pub fn with_wait_context(mut self, wait: WaitContext) -> Self {
        self.wait = wait;
        self
    }

    /// Overrides the clock used to derive the run identity.
    #[must_use]
    pub const fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    /// Current run identity.
    #[must_use]
    pub fn identity(&self) -> &str {
        self.session.identity()
    }

    /// Naming state for the run.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &DeployerConfig {
        &self.config
    }

    /// Deterministic key file locations for the current identity.
    #[must_use]
    pub fn key_paths(&self) -> KeyPaths {
        KeyPaths::for_identity(&self.key_dir, self.session.identity())
    }

    fn preflight(&self) -> Result<(), DeployerError<P::Error>> {
        self.config.require_api_key()?;
        self.config.validate()?;
        Ok(())
    }

    async fn check_is_up(&self) -> Result<bool, DeployerError<P::Error>> {
        let instances = self
            .provider
            .list_instances()
            .await
            .map_err(|source| DeployerError::Provider {
                operation: "list instances",
                source,
            })?;
        Ok(ownership::any_active(&instances, self.session.identity()))
    }
}

fn default_key_dir() -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(env::temp_dir())
        .unwrap_or_else(|path| Utf8PathBuf::from(path.to_string_lossy().into_owned()))
}

impl<P, S> Deployer for LambdaDeployer<P, S>
where
    P: Provider + Send + Sync,
    S: SshProbe + Send + Sync,
{
    type Error = DeployerError<P::Error>;

    fn provider_name(&self) -> &'static str {
        PROVIDER_NAME
    }

    fn build(&self) -> Result<(), Self::Error> {
        info!("build is not needed for {PROVIDER_NAME} instances");
        Ok(())
    }

    fn up(&mut self) -> DeployerFuture<'_, (), Self::Error> {
        Box::pin(self.run_up())
    }

    fn down(&self) -> DeployerFuture<'_, (), Self::Error> {
        Box::pin(self.run_down())
    }

    fn is_up(&self) -> DeployerFuture<'_, bool, Self::Error> {
        Box::pin(self.check_is_up())
    }

    fn kubeconfig(&self) -> Result<Utf8PathBuf, Self::Error> {
        Err(DeployerError::Unsupported("kubeconfig"))
    }
}
