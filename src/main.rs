//! Binary entry point for the meshpool CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use meshpool::{
    AzureMeshProvider, BatchError, BatchFailurePolicy, BatchOrchestrator, LifecycleError,
    MeshConfig, MeshLifecycle, MeshName, ProviderError, Readiness, config::ConfigError,
};

mod cli;

use cli::{BatchCommand, Cli, Command};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("mesh {mesh} failed to provision")]
    MeshFailed { mesh: MeshName },
    #[error("no mesh of the batch came up ({failed} failed)")]
    NothingStarted { failed: usize },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let exit_code = match dispatch(cli.command).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(command: Command) -> Result<(), CliError> {
    let config = MeshConfig::load_without_cli_args()?;
    let shutdown = interrupt_token();
    match command {
        Command::Up => up(&config, shutdown).await,
        Command::Batch(args) => batch(&config, &args, shutdown).await,
    }
}

/// Token cancelled on the first Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received; tearing down");
                trigger.cancel();
            }
            Err(err) => warn!(error = %err, "cannot listen for Ctrl-C"),
        }
    });
    token
}

async fn up(config: &MeshConfig, shutdown: CancellationToken) -> Result<(), CliError> {
    let request = Arc::new(config.as_request()?);
    let provider = Arc::new(AzureMeshProvider::new(config.azure_settings())?);
    let mut lifecycle = MeshLifecycle::new(provider, request, Handle::current())
        .with_options(config.lifecycle_options())
        .with_shutdown(shutdown.clone());

    let ready = match lifecycle.start().await {
        Ok(ready) => ready,
        Err(LifecycleError::Aborted) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    let mesh = ready.mesh().clone();
    let verdict = tokio::select! {
        biased;
        () = shutdown.cancelled() => Ok(()),
        readiness = ready => match readiness {
            Ok(Readiness::Ready) => {
                info!(mesh = %mesh, "mesh ready; press Ctrl-C to tear it down");
                shutdown.cancelled().await;
                Ok(())
            }
            Ok(Readiness::Failed) => Err(CliError::MeshFailed { mesh }),
            Err(err) => Err(err.into()),
        },
    };

    let completion = lifecycle.stop().await?;
    completion.await;
    verdict
}

async fn batch(
    config: &MeshConfig,
    args: &BatchCommand,
    shutdown: CancellationToken,
) -> Result<(), CliError> {
    let request = Arc::new(config.as_request()?);
    let count = args.count.unwrap_or(config.mesh_count);
    let parallelism = args.parallelism.unwrap_or(config.parallelism);
    let policy = if args.continue_on_failure {
        BatchFailurePolicy::Continue
    } else {
        config.failure_policy()?
    };
    let provider = Arc::new(AzureMeshProvider::new(config.azure_settings())?);
    let orchestrator = BatchOrchestrator::new(provider, request, Handle::current(), parallelism)
        .with_options(config.lifecycle_options())
        .with_failure_policy(policy)
        .with_shutdown(shutdown.clone());

    let started = match orchestrator.start(count).await {
        Ok(started) => started,
        Err(BatchError::Aborted) if shutdown.is_cancelled() => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    for failure in started.failures() {
        warn!(error = %failure, "mesh skipped");
    }
    if started.is_empty() && count > 0 && !shutdown.is_cancelled() {
        return Err(CliError::NothingStarted {
            failed: started.failures().len(),
        });
    }

    let names = started
        .names()
        .iter()
        .map(MeshName::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    info!(meshes = %names, "batch ready; press Ctrl-C to tear it down");
    shutdown.cancelled().await;
    orchestrator.stop(started).await?;
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
