//! Configuration loading via `ortho-config`.

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable holding the Lambda Cloud API key.
pub const API_KEY_ENV: &str = "LAMBDA_AI_API_KEY";

const CONFIG_FILE_NAME: &str = "kubetest2-lambda.toml";
const CONFIG_SECTION: &str = "lambda";

/// Deployer settings derived from defaults, configuration files, environment
/// variables, and command-line overrides.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(prefix = "LAMBDA_AI")]
pub struct DeployerConfig {
    /// Base name for the instance. Each `up` appends a UTC timestamp to form
    /// the run identity.
    #[ortho_config(default = "kubetest2-lambda".to_owned())]
    pub instance_name: String,
    /// Region the instance is launched in.
    #[ortho_config(default = "us-east-1".to_owned())]
    pub region: String,
    /// Instance type name (for example `gpu_1x_a100_sxm4`).
    #[ortho_config(default = "gpu_1x_a100_sxm4".to_owned())]
    pub instance_type: String,
    /// Image name passed to the launch call.
    #[ortho_config(default = "Lambda Stack 24.04".to_owned())]
    pub image: String,
    /// Name of an SSH key already registered with the provider. When unset a
    /// key pair is generated for the run.
    pub ssh_key: Option<String>,
    /// Login user for the readiness probe.
    #[ortho_config(default = "ubuntu".to_owned())]
    pub ssh_user: String,
    /// Bearer token for the Lambda Cloud API.
    #[ortho_config(default = String::new())]
    pub api_key: String,
}

/// Per-invocation overrides, usually sourced from CLI flags.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigOverrides {
    /// Replaces [`DeployerConfig::instance_name`].
    pub instance_name: Option<String>,
    /// Replaces [`DeployerConfig::region`].
    pub region: Option<String>,
    /// Replaces [`DeployerConfig::instance_type`].
    pub instance_type: Option<String>,
    /// Replaces [`DeployerConfig::image`].
    pub image: Option<String>,
    /// Replaces [`DeployerConfig::ssh_key`].
    pub ssh_key: Option<String>,
    /// Replaces [`DeployerConfig::ssh_user`].
    pub ssh_user: Option<String>,
    /// Replaces [`DeployerConfig::api_key`].
    pub api_key: Option<String>,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    flag: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        flag: &'static str,
        toml_key: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            flag,
            toml_key,
        }
    }
}

impl DeployerConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "{}: set {}, pass {}, or add {} to [{}] in {}",
                metadata.description,
                metadata.env_var,
                metadata.flag,
                metadata.toml_key,
                CONFIG_SECTION,
                CONFIG_FILE_NAME
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("kubetest2-lambda")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies per-invocation overrides on top of the loaded values.
    #[must_use]
    pub fn with_overrides(self, overrides: ConfigOverrides) -> Self {
        Self {
            instance_name: overrides.instance_name.unwrap_or(self.instance_name),
            region: overrides.region.unwrap_or(self.region),
            instance_type: overrides.instance_type.unwrap_or(self.instance_type),
            image: overrides.image.unwrap_or(self.image),
            ssh_key: overrides.ssh_key.or(self.ssh_key),
            ssh_user: overrides.ssh_user.unwrap_or(self.ssh_user),
            api_key: overrides.api_key.unwrap_or(self.api_key),
        }
    }

    /// Returns the configured SSH key name, treating blank values as unset.
    #[must_use]
    pub fn ssh_key_name(&self) -> Option<&str> {
        self.ssh_key
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Ensures an API key is present before any remote call is attempted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming every way to supply the
    /// key when it is empty.
    pub fn require_api_key(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.api_key,
            &FieldMetadata::new("Lambda AI API key", API_KEY_ENV, "--api-key", "api_key"),
        )
    }

    /// Performs semantic validation on the fields every lifecycle operation
    /// relies on. The API key is checked separately by
    /// [`DeployerConfig::require_api_key`] so read-only operations can run
    /// without it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.instance_name,
            &FieldMetadata::new(
                "instance name",
                "LAMBDA_AI_INSTANCE_NAME",
                "--instance-name",
                "instance_name",
            ),
        )?;
        Self::require_field(
            &self.region,
            &FieldMetadata::new("region", "LAMBDA_AI_REGION", "--region", "region"),
        )?;
        Self::require_field(
            &self.instance_type,
            &FieldMetadata::new(
                "instance type",
                "LAMBDA_AI_INSTANCE_TYPE",
                "--instance-type",
                "instance_type",
            ),
        )?;
        Self::require_field(
            &self.ssh_user,
            &FieldMetadata::new("SSH user", "LAMBDA_AI_SSH_USER", "--ssh-user", "ssh_user"),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EnvGuard, deployer_config};
    use rstest::rstest;

    #[tokio::test]
    async fn loader_applies_defaults_and_reads_api_key_from_env() {
        let _guard = EnvGuard::set_vars(&[(API_KEY_ENV, "from-env")]).await;
        let cfg = DeployerConfig::load_without_cli_args()
            .unwrap_or_else(|err| panic!("config should load: {err}"));
        assert_eq!(cfg.instance_name, "kubetest2-lambda");
        assert_eq!(cfg.region, "us-east-1");
        assert_eq!(cfg.instance_type, "gpu_1x_a100_sxm4");
        assert_eq!(cfg.image, "Lambda Stack 24.04");
        assert_eq!(cfg.ssh_user, "ubuntu");
        assert_eq!(cfg.api_key, "from-env");
    }

    #[test]
    fn missing_api_key_names_every_source() {
        let err = deployer_config("")
            .require_api_key()
            .expect_err("empty key should be rejected");
        let ConfigError::MissingField(ref message) = err else {
            panic!("expected MissingField, got {err:?}");
        };
        for needle in [API_KEY_ENV, "--api-key", "api_key", CONFIG_FILE_NAME] {
            assert!(message.contains(needle), "{needle} missing from: {message}");
        }
    }

    #[test]
    fn missing_field_message_reads_once() {
        let err = deployer_config("")
            .require_api_key()
            .expect_err("empty key should be rejected");
        let rendered = err.to_string();
        assert!(
            rendered.starts_with(
                "missing configuration field: Lambda AI API key: set LAMBDA_AI_API_KEY"
            ),
            "rendered: {rendered}"
        );
        assert_eq!(rendered.matches("missing").count(), 1, "rendered: {rendered}");
    }

    #[rstest]
    #[case(|cfg: &mut DeployerConfig| cfg.instance_name.clear(), "LAMBDA_AI_INSTANCE_NAME")]
    #[case(|cfg: &mut DeployerConfig| cfg.region = String::from("  "), "LAMBDA_AI_REGION")]
    #[case(|cfg: &mut DeployerConfig| cfg.instance_type.clear(), "LAMBDA_AI_INSTANCE_TYPE")]
    #[case(|cfg: &mut DeployerConfig| cfg.ssh_user.clear(), "LAMBDA_AI_SSH_USER")]
    fn validate_rejects_blank_fields(
        #[case] mutate: fn(&mut DeployerConfig),
        #[case] env_var: &str,
    ) {
        let mut cfg = deployer_config("");
        mutate(&mut cfg);
        let err = cfg.validate().expect_err("blank field should fail");
        assert!(err.to_string().contains(env_var), "unexpected: {err}");
    }

    #[test]
    fn overrides_replace_only_supplied_values() {
        let cfg = deployer_config("").with_overrides(ConfigOverrides {
            region: Some(String::from("us-west-2")),
            api_key: Some(String::from("secret")),
            ..ConfigOverrides::default()
        });
        assert_eq!(cfg.region, "us-west-2");
        assert_eq!(cfg.api_key, "secret");
        assert_eq!(cfg.instance_name, "kubetest2-lambda");
    }

    #[rstest]
    #[case(None, None)]
    #[case(Some(""), None)]
    #[case(Some("   "), None)]
    #[case(Some("ci-key"), Some("ci-key"))]
    fn ssh_key_name_treats_blank_as_unset(
        #[case] configured: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let cfg = DeployerConfig {
            ssh_key: configured.map(str::to_owned),
            ..deployer_config("")
        };
        assert_eq!(cfg.ssh_key_name(), expected);
    }
}
