//! The `up` state machine: key bootstrap, launch, address wait, SSH wait.

use tracing::{debug, info, warn};

use crate::keys::{KeyPaths, generate_key_pair};
use crate::probe::{SshProbe, SshTarget};
use crate::provider::{LaunchRequest, Provider};
use crate::wait::{WaitError, poll_until};

use super::{DeployerError, LambdaDeployer};

impl<P, S> LambdaDeployer<P, S>
where
    P: Provider,
    S: SshProbe,
{
    /// Provisions one instance and waits until it accepts SSH.
    ///
    /// Every call derives a fresh identity and launches a new instance.
    pub(super) async fn run_up(&mut self) -> Result<(), DeployerError<P::Error>> {
        self.preflight()?;
        self.session.finalize((self.clock)());
        let paths = self.key_paths();

        let key_name = self.bootstrap_key(&paths).await?;

        let identity = self.session.identity();
        info!(
            instance = identity,
            instance_type = %self.config.instance_type,
            region = %self.config.region,
            "launching instance"
        );
        let request = LaunchRequest::single(
            &self.config.region,
            &self.config.instance_type,
            &key_name,
            identity,
            &self.config.image,
        );
        let instance_id = self
            .provider
            .launch_instance(&request)
            .await
            .map_err(|source| DeployerError::Provider {
                operation: "launch instance",
                source,
            })?;
        info!(instance_id = %instance_id, "instance launched");

        let address = self.wait_for_address(&instance_id).await?;
        info!(instance_id = %instance_id, address = %address, "instance has a public address");

        self.wait_for_ssh(&address, &paths).await?;
        info!(
            instance = self.session.identity(),
            address = %address,
            "instance is up and SSH is available"
        );
        Ok(())
    }

    /// Returns the key name to launch with, generating and registering a key
    /// pair when none was configured.
    async fn bootstrap_key(
        &mut self,
        paths: &KeyPaths,
    ) -> Result<String, DeployerError<P::Error>> {
        if let Some(configured) = self.session.configured_key() {
            warn!(
                key = configured,
                "using existing SSH key; the matching private key must be available to ssh"
            );
            return Ok(configured.to_owned());
        }

        info!("no SSH key configured, generating one");
        let public_key = generate_key_pair(paths)?;
        let key_name = self.session.adopt_generated_key().to_owned();

        let keys = self
            .provider
            .list_keys()
            .await
            .map_err(|source| DeployerError::Provider {
                operation: "list SSH keys",
                source,
            })?;

        if keys.iter().any(|key| key.name == key_name) {
            info!(
                key = %key_name,
                private_key = %paths.private_key(),
                "SSH key already registered, assuming the matching private key is local"
            );
        } else {
            self.provider
                .add_key(&key_name, &public_key)
                .await
                .map_err(|source| DeployerError::Provider {
                    operation: "register SSH key",
                    source,
                })?;
            info!(key = %key_name, "registered SSH key");
        }

        Ok(key_name)
    }

    async fn wait_for_address(
        &self,
        instance_id: &str,
    ) -> Result<String, DeployerError<P::Error>> {
        info!(instance_id, "waiting for the instance to report an address");
        let provider = &self.provider;

        let outcome = poll_until(self.ip_policy, &self.wait, move |attempt| async move {
            let instances = match provider.list_instances().await {
                Ok(instances) => instances,
                Err(err) => {
                    warn!(attempt, error = %err, "failed to list instances");
                    return None;
                }
            };
            let Some(instance) = instances.iter().find(|inst| inst.id == instance_id) else {
                warn!(attempt, instance_id, "instance not found in list yet");
                return None;
            };
            let address = instance.address().map(str::to_owned);
            if address.is_none() {
                debug!(
                    attempt,
                    instance_id,
                    status = %instance.status,
                    "instance has no address yet"
                );
            }
            address
        })
        .await;

        outcome.map_err(|err| match err {
            WaitError::Exhausted { attempts } => DeployerError::AddressTimeout {
                instance_id: instance_id.to_owned(),
                attempts,
            },
            other => DeployerError::Interrupted {
                phase: "address",
                source: other,
            },
        })
    }

    async fn wait_for_ssh(
        &self,
        address: &str,
        paths: &KeyPaths,
    ) -> Result<(), DeployerError<P::Error>> {
        info!(address, "waiting for SSH to become available");
        let target = SshTarget {
            user: self.config.ssh_user.clone(),
            host: address.to_owned(),
            identity_file: paths.private_key(),
        };
        let probe = &self.probe;
        let target_ref = &target;

        let outcome = poll_until(self.ssh_policy, &self.wait, move |attempt| async move {
            match probe.probe(target_ref).await {
                Ok(()) => Some(()),
                Err(err) => {
                    debug!(attempt, error = %err, "SSH not ready yet");
                    None
                }
            }
        })
        .await;

        outcome.map_err(|err| match err {
            WaitError::Exhausted { attempts } => DeployerError::SshTimeout {
                address: address.to_owned(),
                attempts,
            },
            other => DeployerError::Interrupted {
                phase: "ssh",
                source: other,
            },
        })
    }
}
