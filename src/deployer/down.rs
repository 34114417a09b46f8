//! The `down` state machine: terminate, then best-effort credential cleanup.

use tracing::{debug, info, warn};

use crate::keys::remove_key_pair;
use crate::probe::SshProbe;
use crate::provider::Provider;

use super::ownership::{find_live_instance, owned_by_run};
use super::{DeployerError, LambdaDeployer};

impl<P, S> LambdaDeployer<P, S>
where
    P: Provider,
    S: SshProbe,
{
    /// Terminates the run's instance and cleans up its key pair.
    ///
    /// Only a missing API key, the instance listing, and the termination
    /// request can fail the operation. Key cleanup problems are logged.
    /// Running `down` when nothing exists succeeds. Launch settings are not
    /// validated here, so teardown works even with a broken configuration.
    pub(super) async fn run_down(&self) -> Result<(), DeployerError<P::Error>> {
        self.config.require_api_key()?;
        let identity = self.session.identity();

        let instances = self
            .provider
            .list_instances()
            .await
            .map_err(|source| DeployerError::Provider {
                operation: "list instances",
                source,
            })?;

        if let Some(instance) = find_live_instance(&instances, identity) {
            info!(instance = identity, instance_id = %instance.id, "terminating instance");
            self.provider
                .terminate_instance(&instance.id)
                .await
                .map_err(|source| DeployerError::Provider {
                    operation: "terminate instance",
                    source,
                })?;
        } else {
            info!(instance = identity, "no running instance found");
        }

        self.remove_remote_key().await;
        self.remove_local_keys();
        Ok(())
    }

    async fn remove_remote_key(&self) {
        let identity = self.session.identity();
        let candidate = self.session.key_name().unwrap_or(identity);
        if !owned_by_run(candidate, identity) {
            debug!(key = candidate, "SSH key was not created by this run, leaving it registered");
            return;
        }

        let keys = match self.provider.list_keys().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(key = candidate, error = %err, "failed to list SSH keys during cleanup");
                return;
            }
        };
        let Some(key) = keys.iter().find(|key| key.name == candidate) else {
            info!(key = candidate, "SSH key not registered, nothing to delete");
            return;
        };

        match self.provider.delete_key(&key.id).await {
            Ok(()) => info!(key = candidate, key_id = %key.id, "deleted SSH key"),
            Err(err) => warn!(key = candidate, error = %err, "failed to delete SSH key"),
        }
    }

    fn remove_local_keys(&self) {
        let paths = self.key_paths();
        if let Err(err) = remove_key_pair(&paths) {
            warn!(error = %err, "failed to remove local key files");
        }
    }
}
