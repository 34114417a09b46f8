//! Provider abstraction for the remote instance and SSH key inventory.
//!
//! The lifecycle orchestrator only talks to the cloud through [`Provider`],
//! so tests can substitute an in-memory implementation for the HTTP client.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// Boxed future returned by [`Provider`] operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Lifecycle state reported for an instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(from = "String")]
pub enum InstanceStatus {
    /// Instance is starting up.
    Booting,
    /// Instance is running and reachable.
    Active,
    /// Provider flagged the instance as unhealthy.
    Unhealthy,
    /// Termination is in progress.
    Terminating,
    /// Instance has been terminated.
    Terminated,
    /// Any status the provider reports that is not modelled above.
    Other(String),
}

impl InstanceStatus {
    /// Returns the wire representation of the status.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Booting => "booting",
            Self::Active => "active",
            Self::Unhealthy => "unhealthy",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Other(value) => value,
        }
    }
}

impl From<String> for InstanceStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "booting" => Self::Booting,
            "active" => Self::Active,
            "unhealthy" => Self::Unhealthy,
            "terminating" => Self::Terminating,
            "terminated" => Self::Terminated,
            _ => Self::Other(value),
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance type reference embedded in an instance listing.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct InstanceTypeRef {
    /// Instance type name (for example `gpu_1x_a100_sxm4`).
    pub name: String,
}

/// Snapshot of a remote instance.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct Instance {
    /// Provider-assigned identifier.
    pub id: String,
    /// Name given at launch, if any.
    #[serde(default)]
    pub name: Option<String>,
    /// Current lifecycle status.
    pub status: InstanceStatus,
    /// Public IPv4 address once assigned.
    #[serde(default)]
    pub ip: Option<String>,
    /// Instance type the machine runs as.
    #[serde(default)]
    pub instance_type: Option<InstanceTypeRef>,
}

impl Instance {
    /// Returns the public address when one has been assigned. Empty strings
    /// count as unassigned.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.ip.as_deref().filter(|ip| !ip.is_empty())
    }

    /// Returns the instance name, or an empty string when none was given.
    #[must_use]
    pub fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or_default()
    }
}

/// SSH public key registered with the provider.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct SshKey {
    /// Provider-assigned identifier.
    pub id: String,
    /// Account-unique key name.
    pub name: String,
    /// Public key in authorized-key format.
    pub public_key: String,
}

/// Parameters for launching a single instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct LaunchRequest {
    /// Region to launch in.
    pub region_name: String,
    /// Instance type to launch.
    pub instance_type_name: String,
    /// Names of registered SSH keys to install. Always one element.
    pub ssh_key_names: Vec<String>,
    /// Number of instances. Always 1.
    pub quantity: u32,
    /// Instance name. Omitted from the payload when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Image name. Omitted from the payload when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_name: Option<String>,
}

impl LaunchRequest {
    /// Builds a request for one instance. Blank optional fields are dropped.
    #[must_use]
    pub fn single(
        region: &str,
        instance_type: &str,
        ssh_key_name: &str,
        name: &str,
        image: &str,
    ) -> Self {
        Self {
            region_name: region.to_owned(),
            instance_type_name: instance_type.to_owned(),
            ssh_key_names: vec![ssh_key_name.to_owned()],
            quantity: 1,
            name: non_blank(name),
            image_name: non_blank(image),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Interface to the remote instance and SSH key inventory.
pub trait Provider {
    /// Error type returned by the provider.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Lists every instance visible to the account.
    fn list_instances(&self) -> ProviderFuture<'_, Vec<Instance>, Self::Error>;

    /// Launches one instance and returns its identifier.
    ///
    /// Implementations must fail rather than return an empty identifier when
    /// the provider acknowledges the call without launching anything.
    fn launch_instance<'a>(
        &'a self,
        request: &'a LaunchRequest,
    ) -> ProviderFuture<'a, String, Self::Error>;

    /// Requests termination of an instance. Does not wait for completion.
    fn terminate_instance<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error>;

    /// Lists every registered SSH key.
    fn list_keys(&self) -> ProviderFuture<'_, Vec<SshKey>, Self::Error>;

    /// Registers a public key under `name`.
    fn add_key<'a>(
        &'a self,
        name: &'a str,
        public_key: &'a str,
    ) -> ProviderFuture<'a, (), Self::Error>;

    /// Deletes a registered key by identifier.
    fn delete_key<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, (), Self::Error>;
}
