//! Errors surfaced by lifecycle operations.

use thiserror::Error;

use crate::config::ConfigError;
use crate::keys::KeyError;
use crate::wait::WaitError;

/// Errors surfaced while bringing an instance up or tearing it down.
#[derive(Debug, Error)]
pub enum DeployerError<ProviderError>
where
    ProviderError: std::error::Error + 'static,
{
    /// Raised when configuration is incomplete, before any remote call.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when the run's key pair cannot be generated or written.
    #[error("credential setup failed: {0}")]
    Credentials(#[from] KeyError),
    /// Raised when a provider call fails in a way the operation cannot absorb.
    #[error("failed to {operation}: {source}")]
    Provider {
        /// Short description of the call, for example `launch instance`.
        operation: &'static str,
        /// Provider-specific error.
        #[source]
        source: ProviderError,
    },
    /// Raised when the launched instance never reports an address.
    #[error("timed out waiting for instance {instance_id} IP after {attempts} attempts")]
    AddressTimeout {
        /// Launched instance identifier.
        instance_id: String,
        /// Attempts made.
        attempts: u32,
    },
    /// Raised when the instance has an address but never accepts SSH.
    #[error("timed out waiting for SSH on {address} after {attempts} attempts")]
    SshTimeout {
        /// Address that was probed.
        address: String,
        /// Attempts made.
        attempts: u32,
    },
    /// Raised when a wait is cancelled or its deadline passes.
    #[error("{phase} wait interrupted: {source}")]
    Interrupted {
        /// Which wait was interrupted.
        phase: &'static str,
        /// Cancellation or deadline cause.
        #[source]
        source: WaitError,
    },
    /// Raised by host operations this deployer does not implement.
    #[error("{0} is not supported by the Lambda AI deployer")]
    Unsupported(&'static str),
}
