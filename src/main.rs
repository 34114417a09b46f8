//! Binary entry point for the `kubetest2-lambda` deployer.

mod cli;

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use kubetest2_lambda::{
    ConfigError, ConfigOverrides, Deployer, DeployerConfig, DeployerError, LambdaClient,
    LambdaDeployer, LambdaError, SshCommandProbe, WaitContext, cancellation,
};

use cli::{Cli, DeployerFlags};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to create Lambda AI client: {0}")]
    Client(#[source] LambdaError),
    #[error(transparent)]
    Deployer(#[from] DeployerError<LambdaError>),
}

/// Lifecycle actions requested on the command line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
struct Actions {
    build: bool,
    up: bool,
    is_up: bool,
    down: bool,
    kubeconfig: bool,
}

impl From<&Cli> for Actions {
    fn from(cli: &Cli) -> Self {
        Self {
            build: cli.build,
            up: cli.up,
            is_up: cli.is_up,
            down: cli.down,
            kubeconfig: cli.kubeconfig,
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let actions = Actions::from(&cli);
    let config = DeployerConfig::load_without_cli_args()?.with_overrides(overrides(cli.flags));
    let client = LambdaClient::new(config.api_key.clone()).map_err(CliError::Client)?;

    let (handle, token) = cancellation();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, abandoning readiness waits");
            handle.cancel();
        }
    });

    let mut deployer = LambdaDeployer::new(config, client, SshCommandProbe::with_process_runner())
        .with_wait_context(WaitContext::new(token));
    run_actions(&mut deployer, actions, io::stdout()).await?;
    Ok(())
}

fn overrides(flags: DeployerFlags) -> ConfigOverrides {
    ConfigOverrides {
        instance_name: flags.instance_name,
        region: flags.region,
        instance_type: flags.instance_type,
        image: flags.image,
        ssh_key: flags.ssh_key,
        ssh_user: flags.ssh_user,
        api_key: flags.api_key,
    }
}

/// Runs the requested actions in harness order: kubeconfig, build, up,
/// is-up, down. Teardown runs even when `up` fails, and the first error wins.
async fn run_actions<D: Deployer>(
    deployer: &mut D,
    actions: Actions,
    mut out: impl Write,
) -> Result<(), D::Error> {
    if actions.kubeconfig {
        let path = deployer.kubeconfig()?;
        writeln!(out, "{path}").ok();
    }
    if actions.build {
        deployer.build()?;
    }

    let mut outcome = if actions.up {
        deployer.up().await
    } else {
        Ok(())
    };

    if outcome.is_ok() && actions.is_up {
        outcome = deployer.is_up().await.map(|up| {
            writeln!(out, "{up}").ok();
        });
    }

    if actions.down {
        let teardown = deployer.down().await;
        outcome = outcome.and(teardown);
    }

    outcome
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
