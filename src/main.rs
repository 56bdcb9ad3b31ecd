//! Binary entry point for the `ballast` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ballast::{
    Dataset, DatasetId, DestroyOutcome, DigitalOceanClient, DriverConfig, DriverError, GIB, NodeId,
    Reconciler, Volume,
};

mod cli;

use cli::{AttachCommand, Cli, Command, CreateCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid argument: {0}")]
    Argument(String),
    #[error(transparent)]
    Driver(#[from] DriverError),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli.command).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn connect() -> Result<Reconciler, CliError> {
    let config =
        DriverConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let client = DigitalOceanClient::new(&config).map_err(|err| CliError::Config(err.to_string()))?;
    Reconciler::new(client, &config).map_err(|err| CliError::Config(err.to_string()))
}

fn parse_dataset(raw: &str) -> Result<DatasetId, CliError> {
    raw.parse()
        .map_err(|err| CliError::Argument(format!("dataset id {raw:?}: {err}")))
}

async fn dispatch(command: Command) -> Result<(), CliError> {
    let reconciler = connect()?;
    let mut out = io::stdout().lock();
    match command {
        Command::List => {
            for (_, volume) in reconciler.list_datasets().await? {
                write_volume(&mut out, &volume);
            }
        }
        Command::Create(CreateCommand {
            dataset_id,
            size_gib,
        }) => {
            let dataset = Dataset::new(parse_dataset(&dataset_id)?, size_gib.saturating_mul(GIB));
            let volume = reconciler.create(&dataset).await?;
            write_volume(&mut out, &volume);
        }
        Command::Attach(AttachCommand { dataset_id, node }) => {
            let dataset = parse_dataset(&dataset_id)?;
            let node_id = match node {
                Some(id) => NodeId::new(id),
                None => reconciler.compute_instance_id().await?,
            };
            let volume = reconciler.attach(dataset, &node_id).await?;
            write_volume(&mut out, &volume);
        }
        Command::Detach(arg) => {
            let volume = reconciler.detach(parse_dataset(&arg.dataset_id)?).await?;
            write_volume(&mut out, &volume);
        }
        Command::Destroy(arg) => match reconciler.destroy(parse_dataset(&arg.dataset_id)?).await? {
            DestroyOutcome::Destroyed(volume_id) => {
                writeln!(out, "destroyed {volume_id}").ok();
            }
            DestroyOutcome::AlreadyAbsent => {
                writeln!(out, "already absent").ok();
            }
        },
        Command::DevicePath(arg) => {
            let path = reconciler.device_path(&parse_dataset(&arg.dataset_id)?).await?;
            writeln!(out, "{path}").ok();
        }
        Command::Nodes => {
            for node_id in reconciler.list_live_nodes().await? {
                writeln!(out, "{node_id}").ok();
            }
        }
        Command::StartNode(arg) => {
            reconciler.start_node(&NodeId::new(arg.node_id)).await?;
        }
        Command::Whoami => {
            let node = reconciler.local_node().await?;
            writeln!(out, "{}\t{}\t{}", node.id, node.region, node.hostname).ok();
        }
    }
    Ok(())
}

fn write_volume(mut target: impl Write, volume: &Volume) {
    let attached = volume.attached_to.as_ref().map_or("-", NodeId::as_str);
    writeln!(
        target,
        "{}\t{}\t{}\t{}\t{attached}",
        volume.dataset_id, volume.id, volume.size_bytes, volume.region
    )
    .ok();
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
